pub mod cnn;
pub mod mnist;
pub mod preprocess;
