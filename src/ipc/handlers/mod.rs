pub mod categories;
pub mod classes;
pub mod core;
pub mod grades;
pub mod items;
pub mod scores;
pub mod students;
pub mod transmutation;
