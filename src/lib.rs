pub mod candidate;
pub mod controller;
pub mod executor;
pub mod problem;
pub mod provider;
pub mod report;
pub mod strategy;
pub mod tools;
