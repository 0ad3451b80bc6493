pub mod allocation;
pub mod conflict;
pub mod plan;
pub mod rule;
pub mod violation;
