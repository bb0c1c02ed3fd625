// Settlement policies, calendar arithmetic and the periodic sweep
pub mod driver;
pub mod models;
pub mod repository;
pub mod schedule;
pub mod scheduler;
