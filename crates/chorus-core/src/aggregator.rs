//! Second-phase merge of successful answers into one summary

use crate::client::ProviderClient;
use crate::error::ChorusError;
use crate::types::{Completion, CompletionOutcome, ProviderId};

const SUMMARY_INSTRUCTION: &str = "You are merging multiple assistant answers to the same \
question. Write one concise reply synthesizing only the supplied answers. Do not add outside \
knowledge. Keep it brief.";

/// Summary length cap, as a percentage of the tagged transcript length.
const SUMMARY_RATIO_PERCENT: usize = 67;

/// The aggregator's output: a bounded summary plus who contributed to it.
#[derive(Debug, Clone)]
pub struct MergedAnswer {
    pub summary: String,
    pub contributors: Vec<ProviderId>,
}

/// Merge an exchange's successful completions through the aggregator client.
///
/// Failures are excluded from the transcript. With zero successes there is
/// nothing to merge and the whole aggregate request fails.
pub async fn summarize(
    client: &ProviderClient,
    completions: &[Completion],
) -> Result<MergedAnswer, ChorusError> {
    let (transcript, contributors) = build_transcript(completions);
    if contributors.is_empty() {
        return Err(ChorusError::Aggregation(
            "no successful completions to merge".to_string(),
        ));
    }

    let answer = client
        .call_with_instruction(&transcript, SUMMARY_INSTRUCTION)
        .await
        .map_err(|err| {
            ChorusError::Aggregation(format!("aggregator '{}' failed: {}", client.id(), err))
        })?;

    let opening = if contributors.len() > 1 {
        let names: Vec<&str> = contributors.iter().map(|p| p.as_str()).collect();
        format!("Combined from {}: ", names.join(", "))
    } else {
        String::new()
    };
    let cap = summary_cap(transcript.chars().count());
    let summary = truncate_chars(&format!("{}{}", opening, answer.text.trim()), cap);
    Ok(MergedAnswer {
        summary,
        contributors,
    })
}

/// Tag each successful answer with its provider and join the blocks.
/// Contributor order follows the completion slice, which is already in
/// provider-identity order.
fn build_transcript(completions: &[Completion]) -> (String, Vec<ProviderId>) {
    let mut blocks = Vec::new();
    let mut contributors = Vec::new();
    for completion in completions {
        if completion.outcome != CompletionOutcome::Success {
            continue;
        }
        let Some(text) = &completion.text else {
            continue;
        };
        blocks.push(format!("[{}]\n{}", completion.provider, text));
        contributors.push(completion.provider.clone());
    }
    (blocks.join("\n\n"), contributors)
}

fn summary_cap(transcript_chars: usize) -> usize {
    (transcript_chars * SUMMARY_RATIO_PERCENT).div_ceil(100)
}

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    text.chars().take(cap).collect()
}
