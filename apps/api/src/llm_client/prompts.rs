// Cross-cutting prompt fragments. Services that call the LLM keep their own
// prompts.rs next to them and append these where needed.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps LaTeX intact when text passes through the model.
pub const PRESERVE_LATEX_INSTRUCTION: &str = "\
    Preserve every LaTeX math expression exactly as written ($...$, \\(...\\), \\[...\\]). \
    Never invent notation that is not present in the source text.";
