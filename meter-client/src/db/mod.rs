pub mod entity_queries;
pub mod statistics_queries;
