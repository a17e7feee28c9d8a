// Prompt templates for card regeneration.

pub const REWRITE_SYSTEM: &str = "\
You rewrite spaced-repetition flashcards generated from LaTeX lecture notes. \
Keep the card atomic: one fact or idea per card. \
The front is a precise question or cloze prompt; the back is the shortest complete answer.";

pub const REWRITE_PROMPT: &str = r#"Rewrite the following flashcard so it is clearer and easier to recall.

COURSE: {course}
LATEX ENVIRONMENT: {environment}
CARD TYPE: {card_type}
SLOT: {slot}

CURRENT FRONT:
{front}

CURRENT BACK:
{back}

Return exactly this JSON object:
{"front": "string", "back": "string"}"#;
