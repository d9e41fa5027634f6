pub mod handlers;
pub mod models;
pub mod repository;
pub mod router;
pub mod services;

pub use models::*;
pub use repository::{ExpertRepository, InMemoryExpertRepository, SupabaseExpertRepository};
pub use services::*;
pub use router::{expert_routes, ExpertState};
