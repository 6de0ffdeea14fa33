pub mod applications;
pub mod location;
pub mod reference;
