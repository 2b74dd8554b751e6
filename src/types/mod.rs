//! Type definitions for the lesion detection service

pub mod response;

pub use response::{
    ClassesResponse, ErrorResponse, HealthResponse, PredictResponse, StatusResponse, TopPrediction,
};
