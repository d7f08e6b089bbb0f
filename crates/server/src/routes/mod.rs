pub mod auth;
pub mod documents;
pub mod elements;
pub mod floorplans;
