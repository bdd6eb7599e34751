pub mod assignment;
pub mod blob_detector;
pub mod cost_matrix;
pub mod frame;
pub mod linker;
pub mod mitosis;
pub mod spot;
pub mod spot_detector;
pub mod track;
pub mod track_builder;
pub mod track_selector;
