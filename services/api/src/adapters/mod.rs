pub mod chat_llm;
pub mod db;
pub mod image_llm;
pub mod password;
pub mod stripe;

pub use chat_llm::OpenAiChatAdapter;
pub use db::DbAdapter;
pub use image_llm::OpenAiImageAdapter;
pub use password::Argon2Scheme;
pub use stripe::StripeAdapter;
