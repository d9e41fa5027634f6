pub mod error;
pub mod supabase;

pub use error::RepositoryError;
pub use supabase::{SupabaseClient, SupabaseError};
