// Generated from proto/deltadiff.proto by tonic-build (see build.rs).
pub mod deltadiff;
