pub mod alerts;
pub mod breakers;
pub mod executions;
pub mod rules;
pub mod runbooks;
pub mod schedules;
pub mod servers;
