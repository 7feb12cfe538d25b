use crate::gemini::{run_with_retry, ChatOutcome, GeminiClient, RetryPolicy, TokioSleeper};

pub const CANNOT_PROCESS_REPLY: &str =
    "Sorry, Tika could not make sense of that question. Please try asking it another way.";
pub const BUSY_REPLY: &str =
    "Sorry, Tika is a little busy right now. Please try again in a moment.";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub success: bool,
    pub reply: String,
}

/// Answers one user message. The weekly metrics summary is injected into the
/// persona prompt so the model can ground its answer in recent numbers.
pub async fn respond(
    gemini: &GeminiClient,
    context: &str,
    message: &str,
    user_name: &str,
) -> ChatReply {
    let prompt = build_prompt(context, user_name, message);
    let outcome = run_with_retry(&RetryPolicy::default(), &TokioSleeper, || {
        gemini.generate(&prompt)
    })
    .await;
    reply_for(outcome)
}

fn reply_for(outcome: ChatOutcome) -> ChatReply {
    match outcome {
        ChatOutcome::Reply(text) => ChatReply {
            success: true,
            reply: text,
        },
        ChatOutcome::EmptyReply => ChatReply {
            success: false,
            reply: CANNOT_PROCESS_REPLY.to_string(),
        },
        ChatOutcome::Exhausted | ChatOutcome::Aborted => ChatReply {
            success: false,
            reply: BUSY_REPLY.to_string(),
        },
    }
}

fn build_prompt(context: &str, user_name: &str, message: &str) -> String {
    format!(
        "{system}\n\nUser ({user_name}): {message}",
        system = system_prompt(context)
    )
}

fn system_prompt(context: &str) -> String {
    format!(
        "You are Tika, the virtual assistant for RoxyDental Clinic.\n\
         Your job is to answer questions about the clinic in a friendly, professional way.\n\
         \n\
         Clinic information:\n\
         {context}\n\
         \n\
         Answer guidelines:\n\
         - Keep answers warm and to the point\n\
         - Use the data above when it is relevant\n\
         - If you do not know something, say so honestly\n\
         - Do not give medical advice, refer those questions to the dentist"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_persona_context_and_user_message() {
        let prompt = build_prompt(
            "- Total revenue: Rp 5000",
            "Rina",
            "How was business this month?",
        );

        assert!(prompt.contains("You are Tika"));
        assert!(prompt.contains("- Total revenue: Rp 5000"));
        assert!(prompt.contains("User (Rina): How was business this month?"));
        assert!(prompt.contains("refer those questions to the dentist"));
    }

    #[test]
    fn successful_outcomes_keep_the_model_reply() {
        let reply = reply_for(ChatOutcome::Reply("We had a good week.".to_string()));
        assert!(reply.success);
        assert_eq!(reply.reply, "We had a good week.");
    }

    #[test]
    fn failures_always_map_to_canned_replies() {
        let empty = reply_for(ChatOutcome::EmptyReply);
        assert!(!empty.success);
        assert_eq!(empty.reply, CANNOT_PROCESS_REPLY);

        for outcome in [ChatOutcome::Exhausted, ChatOutcome::Aborted] {
            let reply = reply_for(outcome);
            assert!(!reply.success);
            assert_eq!(reply.reply, BUSY_REPLY);
        }
    }
}
