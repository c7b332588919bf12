pub mod recognition;
pub mod validation;
pub mod violations;
