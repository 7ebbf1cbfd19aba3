pub mod fixtures;

mod constrained;
mod dual_estimation;
mod lsq;
mod restoration;
mod unconstrained;
