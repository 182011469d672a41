
pub mod dsox3000;
