pub mod gemini;
pub mod groq;
