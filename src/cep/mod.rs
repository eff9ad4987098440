pub mod family_tree;
pub mod match_index;
pub mod registry;
