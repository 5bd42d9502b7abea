pub mod carousel;
pub mod search;
pub mod servers;
pub mod sidebar;
