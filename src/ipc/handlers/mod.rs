pub mod analytics;
pub mod classrooms;
pub mod core;
pub mod cycles;
pub mod enrollments;
pub mod grades;
pub mod guardians;
pub mod imports;
pub mod programs;
pub mod promotion;
pub mod settings;
pub mod subjects;
pub mod users;
