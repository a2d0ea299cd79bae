/// Appended to every system prompt whose answer is parsed with `call_json`.
pub const JSON_ONLY_SYSTEM: &str = "Respond with a single valid JSON object and nothing else. \
    No markdown code fences, no commentary before or after the object.";
