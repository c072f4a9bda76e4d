//! Generation routines: topics, prerequisite edges, flashcards, exams, and
//! stack-scoped chat.
//!
//! Prompts ask for bare JSON, but models routinely wrap it in prose or code
//! fences; [`carve_object`] and [`carve_array`] cut the payload out between
//! the outermost delimiters before parsing.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use super::client::{CompletionMessage, LlmClient, LlmError, Result};
use crate::chat::{AttachmentKind, HydratedAttachment};

/// Extract 8-18 high-level topics for a subject as a name -> description
/// map, avoiding topics that already exist.
pub async fn extract_topics(
    client: &LlmClient,
    subject: &str,
    description: Option<&str>,
    avoid_topics: &[String],
) -> Result<BTreeMap<String, String>> {
    let prompt = format!(
        "Subject: {subject}\n\
         Description: {}\n\n\
         Extract a list of 8-18 high-level topics relevant to this subject. \
         For each topic, return a short 1-2 sentence description explaining it. \
         Format your output as a JSON object where keys are the topic names \
         and values are the short descriptions. Do not include extra explanation \
         outside the JSON object. \
         The following topics have already been extracted. Do not extract them: {}\n",
        description.unwrap_or(""),
        avoid_topics.join(", "),
    );

    let content = client
        .complete(&[CompletionMessage::user(prompt)], None)
        .await?;
    let topics: BTreeMap<String, String> = serde_json::from_str(carve_object(&content)?)?;
    Ok(topics)
}

/// Infer prerequisite edges between the given topics. Each edge `(a, b)`
/// means "a should be understood before b".
pub async fn infer_topic_dependencies(
    client: &LlmClient,
    topics: &[String],
) -> Result<Vec<(String, String)>> {
    let prompt = format!(
        "Given the following list of topics:\n\n{topics:?}\n\n\
         Infer prerequisite relationships between them. Return a list of directed \
         edges in the format:\n[[\"Topic A\", \"Topic B\"], ...]\n\n\
         Where an edge [\"A\", \"B\"] means that \"A should be understood before B\".\n\
         Only include edges you are confident in. Do not invent new topics. \
         Do not explain anything. Do not create circular dependencies."
    );

    let content = client
        .complete(&[CompletionMessage::user(prompt)], None)
        .await?;
    let raw: Vec<Vec<String>> = serde_json::from_str(carve_array(&content)?)?;
    raw.into_iter()
        .map(|pair| {
            let mut it = pair.into_iter();
            match (it.next(), it.next(), it.next()) {
                (Some(from), Some(to), None) => Ok((from, to)),
                _ => Err(LlmError::MalformedResponse(
                    "dependency edge is not a pair".to_string(),
                )),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedFlashcard {
    pub front: String,
    pub back: String,
    pub explanation: String,
}

/// Generate flashcards for a topic, avoiding fronts that already exist.
pub async fn extract_flashcards(
    client: &LlmClient,
    topic: &str,
    num_cards: usize,
    avoid_fronts: &[String],
    context: Option<&str>,
) -> Result<Vec<GeneratedFlashcard>> {
    let avoid_text = if avoid_fronts.is_empty() {
        String::new()
    } else {
        format!(
            "The following flashcards have already been created. Do not create \
             flashcards with these fronts: {}\n\n",
            avoid_fronts.join(", ")
        )
    };
    let context_text = context.map_or(String::new(), |c| {
        format!(
            "Consider the following context if relevant but disregard if it is \
             unrelated to the topic: {c}"
        )
    });
    let prompt = format!(
        "Generate a set of {num_cards} flashcards for the following topic:\n\n\
         Topic: {topic}\n\n\
         Each flashcard should have a 'front' (question/prompt), a 'back' (concise \
         answer that may be in incomplete sentences, prefer 1 sentence or less), and \
         an 'explanation' (2-3 sentence explanation of the answer). \
         Format your output as a JSON array of objects with 'front', 'back', and \
         'explanation' fields. Do not include any extra text outside the JSON array.\n\
         {avoid_text}{context_text}"
    );

    let content = client
        .complete(&[CompletionMessage::user(prompt)], None)
        .await?;
    let cards: Vec<GeneratedFlashcard> = serde_json::from_str(carve_array(&content)?)?;
    Ok(cards)
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedQuestion {
    pub text: String,
    /// Answer choices keyed by option letter.
    pub choices: HashMap<String, String>,
    pub topic_name: String,
    /// The correct option letter.
    pub answer: String,
}

impl GeneratedQuestion {
    /// The four choices in A-D order, or `None` when a letter is missing.
    pub fn options(&self) -> Option<[String; 4]> {
        Some([
            self.choices.get("A")?.clone(),
            self.choices.get("B")?.clone(),
            self.choices.get("C")?.clone(),
            self.choices.get("D")?.clone(),
        ])
    }
}

/// Generate the questions for a multiple-choice exam over the given topics.
pub async fn create_multiple_choice_exam(
    client: &LlmClient,
    title: &str,
    topics: &[String],
    num_questions: usize,
    context: Option<&str>,
) -> Result<Vec<GeneratedQuestion>> {
    let context_text = context.map_or(String::new(), |c| {
        format!(
            "Consider the following context if relevant but disregard if it is \
             unrelated to the topic: {c}"
        )
    });
    let prompt = format!(
        "Generate the questions for a multiple-choice exam titled '{title}' with \
         {num_questions} questions covering the following topics:\n\n\
         Topics: {topics:?}\n\n\
         Each question should have 4 answer choices labeled 'A', 'B', 'C', and 'D', \
         with one correct answer. Format your output as a JSON array of objects with \
         'text', 'choices' (a dict of options keyed by letter), 'topic_name' (the \
         name of the topic), and 'answer' (the correct option letter). \
         Do not include any extra text outside the JSON array.{context_text}"
    );

    let content = client
        .complete(&[CompletionMessage::user(prompt)], None)
        .await?;
    let questions: Vec<GeneratedQuestion> = serde_json::from_str(carve_array(&content)?)?;
    Ok(questions)
}

/// Answer the latest user turn, with hydrated attachments prepended as a
/// system preamble.
pub async fn chat_with_context(
    client: &LlmClient,
    messages: Vec<CompletionMessage>,
    attachments: &[HydratedAttachment],
) -> Result<String> {
    let mut final_messages = Vec::with_capacity(messages.len() + 1);
    if !attachments.is_empty() {
        let attachment_texts: Vec<String> = attachments
            .iter()
            .map(|a| format!("{}: {}", kind_label(a.kind), a.text))
            .collect();
        final_messages.push(CompletionMessage::system(format!(
            "The user has attached the following context. Respond concisely, \
             maximum 5 sentences.\n\n{}",
            attachment_texts.join("\n")
        )));
    }
    final_messages.extend(messages);

    client.complete(&final_messages, Some(0.6)).await
}

/// A short title (max 6 words) for a chat, from its opening messages.
pub async fn generate_chat_title(
    client: &LlmClient,
    opening_messages: &[String],
    attachments: &[HydratedAttachment],
) -> Result<String> {
    let attachment_texts: Vec<String> = attachments
        .iter()
        .map(|a| format!("{}: {}", kind_label(a.kind), a.text))
        .collect();
    let messages = vec![
        CompletionMessage::system(format!(
            "The user has attached the following context. {}",
            attachment_texts.join("\n")
        )),
        CompletionMessage::system(
            "You are to generate a short, descriptive title (maximum 6 words) \
             for the following chat. Return only the title, no quotes, no punctuation.",
        ),
        CompletionMessage::user(
            opening_messages
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    ];
    client.complete(&messages, Some(0.5)).await
}

fn kind_label(kind: AttachmentKind) -> &'static str {
    match kind {
        AttachmentKind::ExamQuestion => "Exam Question",
        AttachmentKind::Flashcard => "Flashcard",
        AttachmentKind::Topic => "Topic",
    }
}

/// Cut the JSON object out of a completion, tolerating surrounding prose.
fn carve_object(content: &str) -> Result<&str> {
    carve(content, '{', '}')
}

/// Cut the JSON array out of a completion, tolerating surrounding prose.
fn carve_array(content: &str) -> Result<&str> {
    carve(content, '[', ']')
}

fn carve(content: &str, open: char, close: char) -> Result<&str> {
    let trimmed = content.trim();
    if trimmed.starts_with(open) && trimmed.ends_with(close) {
        return Ok(trimmed);
    }
    let start = trimmed
        .find(open)
        .ok_or_else(|| LlmError::MalformedResponse(format!("no '{open}' in response")))?;
    let end = trimmed
        .rfind(close)
        .ok_or_else(|| LlmError::MalformedResponse(format!("no '{close}' in response")))?;
    if end < start {
        return Err(LlmError::MalformedResponse(
            "delimiters out of order".to_string(),
        ));
    }
    Ok(&trimmed[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carve_passes_bare_json_through() {
        assert_eq!(carve_object(r#"{"a": 1}"#).unwrap(), r#"{"a": 1}"#);
        assert_eq!(carve_array("[1, 2]").unwrap(), "[1, 2]");
    }

    #[test]
    fn carve_strips_prose_and_fences() {
        let content = "Here you go:\n```json\n[{\"front\": \"Q\"}]\n```\nEnjoy!";
        assert_eq!(carve_array(content).unwrap(), "[{\"front\": \"Q\"}]");

        let content = "Sure! {\"Limits\": \"The foundation.\"} Hope that helps.";
        assert_eq!(
            carve_object(content).unwrap(),
            "{\"Limits\": \"The foundation.\"}"
        );
    }

    #[test]
    fn carve_rejects_payload_free_text() {
        assert!(carve_array("no json here").is_err());
        assert!(carve_object("] backwards [").is_err());
    }

    #[test]
    fn generated_question_requires_all_four_options() {
        let mut choices = HashMap::new();
        for (k, v) in [("A", "1"), ("B", "2"), ("C", "3"), ("D", "4")] {
            choices.insert(k.to_string(), v.to_string());
        }
        let q = GeneratedQuestion {
            text: "Q".into(),
            choices: choices.clone(),
            topic_name: "T".into(),
            answer: "A".into(),
        };
        assert!(q.options().is_some());

        let mut incomplete = q.clone();
        incomplete.choices.remove("D");
        assert!(incomplete.options().is_none());
    }

    #[test]
    fn generated_cards_parse_from_carved_array() {
        let content = "```json\n[{\"front\": \"F\", \"back\": \"B\", \"explanation\": \"E\"}]\n```";
        let cards: Vec<GeneratedFlashcard> =
            serde_json::from_str(carve_array(content).unwrap()).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].front, "F");
    }
}
