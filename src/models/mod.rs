pub mod negotiationmodel;
pub mod usermodel;
