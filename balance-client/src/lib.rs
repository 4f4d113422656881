pub mod analytics;
pub mod db;
pub mod domain;
pub mod series;

pub use domain::Reading;
