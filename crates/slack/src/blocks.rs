use serde::Serialize;

/// Slack rejects section text longer than this.
pub const SECTION_TEXT_LIMIT: usize = 3_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Context { block_id: String, elements: Vec<TextObject> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

/// Posts pipeline text as-is, split over several sections when it is too
/// long for one.
pub fn reply_message(text: &str) -> MessageTemplate {
    chunk_lines(text, SECTION_TEXT_LIMIT)
        .into_iter()
        .enumerate()
        .fold(MessageBuilder::new(text), |builder, (index, chunk)| {
            builder.section(format!("cleanq.reply.{index}.v1"), |section| {
                section.mrkdwn(chunk);
            })
        })
        .build()
}

pub fn acknowledgement_message(text: &str) -> MessageTemplate {
    MessageBuilder::new(text)
        .context("cleanq.ack.v1", |context| {
            context.mrkdwn(format!(":hourglass_flowing_sand: {text}"));
        })
        .build()
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(summary.to_owned())
        .section("cleanq.error.summary.v1", |section| {
            section.mrkdwn(format!(":warning: {summary}"));
        })
        .context("cleanq.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

const CODE_FENCE: &str = "```";

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with(CODE_FENCE)
}

/// Splits on line boundaries, hard-splitting lines longer than `limit`.
/// A code fence open at a split is closed in that chunk and reopened in the
/// next, so every chunk renders on its own.
fn chunk_lines(text: &str, limit: usize) -> Vec<String> {
    let budget = limit.saturating_sub(2 * (CODE_FENCE.len() + 1)).max(CODE_FENCE.len() + 2);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.split('\n') {
        let closes_fence = in_fence && is_fence(line);
        let needed = if current.is_empty() { line.len() } else { current.len() + 1 + line.len() };
        if needed > budget && !current.is_empty() && !closes_fence {
            let mut chunk = std::mem::take(&mut current);
            if in_fence {
                chunk.push('\n');
                chunk.push_str(CODE_FENCE);
                current.push_str(CODE_FENCE);
            }
            chunks.push(chunk);
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        if is_fence(line) {
            in_fence = !in_fence;
        }

        while current.len() > budget {
            let mut split_at = budget;
            while !current.is_char_boundary(split_at) {
                split_at -= 1;
            }
            let mut rest = current.split_off(split_at);
            if in_fence {
                current.push('\n');
                current.push_str(CODE_FENCE);
                rest.insert_str(0, "```\n");
            }
            chunks.push(std::mem::replace(&mut current, rest));
        }
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}
