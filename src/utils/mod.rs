pub mod polling_profile;
pub mod priority;
