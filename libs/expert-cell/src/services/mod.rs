pub mod calendar;
pub mod slots;

pub use calendar::AvailabilityCalendar;
pub use slots::SlotGenerator;
