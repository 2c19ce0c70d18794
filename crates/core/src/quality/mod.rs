pub mod face_landmarks;
pub mod quality_filter;
