pub mod constants;
pub mod face;
pub mod vector_math;
