pub mod fetch;
pub mod horizon;
pub mod observer;
pub mod scheduler;
pub mod snapshot;
pub mod visibility;
pub mod web;
