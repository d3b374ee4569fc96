pub mod documents;
pub mod events;
pub mod opportunities;
pub mod stages;
pub mod sweep;
pub mod types;
