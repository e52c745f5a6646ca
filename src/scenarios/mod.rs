pub mod arena;
pub mod dungeon;
pub mod farming;
pub mod pagination;
