pub mod activation;
pub mod conv;
pub mod dense;
pub mod flatten;
pub mod layer;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod pool;

pub use activation::Activation;
pub use conv::Conv2d;
pub use dense::Dense;
pub use flatten::Flatten;
pub use layer::{Layer, Param, Tensor};
pub use model::{argmax, EpochMetrics, FitOptions, History, Sequential, Summary};
pub use optimizer::Adam;
pub use pool::MaxPool2d;
