pub mod analytics;
pub mod classrooms;
pub mod config;
pub mod cycles;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod grades;
pub mod guardians;
pub mod import;
pub mod ipc;
pub mod model;
pub mod policy;
pub mod programs;
pub mod promotion;
pub mod subjects;
pub mod users;

pub use error::{CoreError, CoreResult};
pub use policy::Principal;
