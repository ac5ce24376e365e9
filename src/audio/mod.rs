pub mod decoder;
pub mod normalize;
pub mod pipeline;
pub mod preloader;
pub mod queue;
pub mod stream_source;
