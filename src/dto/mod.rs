pub mod grid;
pub mod health;
pub mod pool;
pub mod square;
pub mod sports;
pub mod user;
pub mod validation;
