pub mod face_index;
pub mod json_face_index_reader;
