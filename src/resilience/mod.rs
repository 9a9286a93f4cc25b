pub mod policy;

pub use policy::TrialErrorPolicy;
