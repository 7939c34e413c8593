pub mod membership;
pub mod mention_group;
pub mod user;
