pub mod db;
pub mod generation;
pub mod mirror;

pub use db::DbAdapter;
pub use generation::OpenAiGenerationAdapter;
pub use mirror::HttpMirrorAdapter;
