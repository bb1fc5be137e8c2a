use slotline_core::domain::session::ConversationTurn;
use slotline_core::flows::ConversationState;
use slotline_core::ports::PromptTurn;

const SYSTEM_TEMPLATE: &str = r#"You are a helpful appointment booking assistant working over SMS. Your job is to:

1. Extract date and time preferences from user messages
2. Determine if you have enough information to check availability
3. Provide friendly, professional, concise responses

CRITICAL: Respond with ONLY a JSON object. No markdown, no code fences, no extra text.

RESPONSE FORMAT:
{
    "extracted_datetime": "YYYY-MM-DD HH:MM" or null,
    "response_message": "Your reply to the user",
    "next_state": "collecting_preferences" | "checking_availability" | "completed",
    "needs_more_info": true or false,
    "confidence": 0.0 to 1.0,
    "extracted_elements": {
        "date_mentioned": "text that indicates the date" or null,
        "time_mentioned": "text that indicates the time" or null,
        "timezone": "timezone the user mentioned" or null
    }
}

EXAMPLES:

User: "Tomorrow at 2pm"
Response: {"extracted_datetime": "{example_date} 14:00", "response_message": "Great! I'll check if tomorrow at 2 PM is available for you.", "next_state": "checking_availability", "needs_more_info": false, "confidence": 0.9, "extracted_elements": {"date_mentioned": "tomorrow", "time_mentioned": "2pm", "timezone": null}}

User: "I need to meet next week"
Response: {"extracted_datetime": null, "response_message": "I'd be happy to help you schedule for next week! What day and time would work best for you?", "next_state": "collecting_preferences", "needs_more_info": true, "confidence": 0.3, "extracted_elements": {"date_mentioned": "next week", "time_mentioned": null, "timezone": null}}

RULES:
- Assume {timezone} if the user gives no timezone
- Convert relative dates (today, tomorrow, next Monday) to absolute dates
- If the date or time is unclear, ask for clarification and set needs_more_info to true
- Current date and time: {current_datetime}
- Current conversation state: {conversation_state}"#;

/// Everything the prompt needs to know about "now".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptContext {
    pub current_datetime: String,
    pub tomorrow_date: String,
    pub timezone: String,
}

pub fn system_prompt(context: &PromptContext, state: &ConversationState) -> String {
    SYSTEM_TEMPLATE
        .replace("{current_datetime}", &context.current_datetime)
        .replace("{example_date}", &context.tomorrow_date)
        .replace("{timezone}", &context.timezone)
        .replace("{conversation_state}", state.as_str())
}

/// System instructions, then prior turns oldest first, then the new message.
pub fn build_turns(
    context: &PromptContext,
    state: &ConversationState,
    history: &[ConversationTurn],
    user_text: &str,
) -> Vec<PromptTurn> {
    let mut turns = Vec::with_capacity(history.len() * 2 + 2);
    turns.push(PromptTurn::system(system_prompt(context, state)));
    for turn in history {
        turns.push(PromptTurn::user(turn.user_text.clone()));
        turns.push(PromptTurn::assistant(turn.assistant_text.clone()));
    }
    turns.push(PromptTurn::user(user_text.trim()));
    turns
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use slotline_core::domain::session::ConversationTurn;
    use slotline_core::flows::ConversationState;
    use slotline_core::ports::PromptRole;

    use super::{build_turns, system_prompt, PromptContext};

    fn context() -> PromptContext {
        PromptContext {
            current_datetime: "2025-01-20 12:00 (Monday)".to_string(),
            tomorrow_date: "2025-01-21".to_string(),
            timezone: "America/New_York".to_string(),
        }
    }

    #[test]
    fn system_prompt_fills_every_placeholder() {
        let prompt = system_prompt(&context(), &ConversationState::CollectingPreferences);

        assert!(prompt.contains("2025-01-20 12:00 (Monday)"));
        assert!(prompt.contains("\"2025-01-21 14:00\""));
        assert!(prompt.contains("Assume America/New_York"));
        assert!(prompt.contains("collecting_preferences"));
        assert!(!prompt.contains("{current_datetime}"));
        assert!(!prompt.contains("{example_date}"));
        assert!(!prompt.contains("{timezone}"));
    }

    #[test]
    fn turns_include_history_in_order() {
        let at = Utc.with_ymd_and_hms(2025, 1, 20, 12, 0, 0).single().expect("valid instant");
        let history = vec![
            ConversationTurn {
                user_text: "hi".to_string(),
                assistant_text: "When works?".to_string(),
                timestamp: at,
            },
            ConversationTurn {
                user_text: "next week".to_string(),
                assistant_text: "Which day?".to_string(),
                timestamp: at,
            },
        ];

        let turns = build_turns(
            &context(),
            &ConversationState::CollectingPreferences,
            &history,
            " thursday 2pm ",
        );

        let roles: Vec<PromptRole> = turns.iter().map(|turn| turn.role).collect();
        assert_eq!(
            roles,
            vec![
                PromptRole::System,
                PromptRole::User,
                PromptRole::Assistant,
                PromptRole::User,
                PromptRole::Assistant,
                PromptRole::User,
            ]
        );
        assert_eq!(turns[3].content, "next week");
        assert_eq!(turns[5].content, "thursday 2pm");
    }
}
