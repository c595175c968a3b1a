pub mod resample;

pub use resample::ResampleImageFilter;
