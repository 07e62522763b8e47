use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use futures_util::future::join_all;
use llmdocs_ai::{ContentPart, Message, MessageContent, Role};
use regex::Regex;

/// `[[target]]` and `![[target]]` wiki links; group 1 is the target.
fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"!?\[\[(.+?)\]\]").expect("link pattern is valid"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPart<'a> {
    pub text: &'a str,
    /// First capture group of a separator match; `None` for plain text.
    pub inner_match: Option<&'a str>,
    pub is_separator: bool,
}

impl<'a> SplitPart<'a> {
    fn plain(text: &'a str) -> Self {
        Self {
            text,
            inner_match: None,
            is_separator: false,
        }
    }
}

/// Splits `input` around every match of `separator`, keeping the matches as
/// separator parts. Empty plain segments are omitted.
pub fn split_keeping_separators<'a>(input: &'a str, separator: &Regex) -> Vec<SplitPart<'a>> {
    let mut parts = Vec::new();
    let mut last_end = 0;
    for captures in separator.captures_iter(input) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() > last_end {
            parts.push(SplitPart::plain(&input[last_end..whole.start()]));
        }
        parts.push(SplitPart {
            text: whole.as_str(),
            inner_match: captures.get(1).map(|inner| inner.as_str()),
            is_separator: true,
        });
        last_end = whole.end();
    }
    if last_end < input.len() {
        parts.push(SplitPart::plain(&input[last_end..]));
    }
    parts
}

pub type LinkFuture<'a> = Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

/// Maps a link target to replacement content, or `None` when it cannot be
/// resolved.
pub trait LinkResolver: Send + Sync {
    fn resolve<'a>(&'a self, link: &'a str) -> LinkFuture<'a>;
}

/// Resolves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLinks;

impl LinkResolver for NoLinks {
    fn resolve<'a>(&'a self, _link: &'a str) -> LinkFuture<'a> {
        Box::pin(async { None })
    }
}

/// Prepares transcript messages for the API:
/// whitespace-only system prompts are dropped, assistant messages pass
/// through untouched, and other messages get text links expanded and image
/// links turned into `image_url` parts.
pub async fn preprocess_messages(
    messages: &[Message],
    text_resolver: &dyn LinkResolver,
    image_resolver: &dyn LinkResolver,
) -> Vec<Message> {
    let kept = messages.iter().filter(|message| {
        !(message.role == Role::System && message.content.as_text().trim().is_empty())
    });
    let expanded = kept.map(|message| async move {
        if message.role == Role::Assistant {
            return message.clone();
        }
        let text = expand_links(&message.content.as_text(), text_resolver).await;
        Message {
            role: message.role,
            content: resolve_images(&text, image_resolver).await,
        }
    });
    join_all(expanded).await
}

async fn expand_links(content: &str, resolver: &dyn LinkResolver) -> String {
    let parts = split_keeping_separators(content, link_pattern());
    let resolved = parts.iter().map(|part| async move {
        match part.inner_match {
            Some(link) if part.is_separator => resolver
                .resolve(link)
                .await
                .unwrap_or_else(|| part.text.to_string()),
            _ => part.text.to_string(),
        }
    });
    join_all(resolved).await.concat()
}

async fn resolve_images(content: &str, resolver: &dyn LinkResolver) -> MessageContent {
    let parts = split_keeping_separators(content, link_pattern());
    let resolved = parts.iter().map(|part| async move {
        if let Some(link) = part.inner_match.filter(|_| part.is_separator) {
            if let Some(url) = resolver.resolve(link).await {
                return ContentPart::image_url(url);
            }
        }
        ContentPart::text(part.text)
    });
    let parts = join_all(resolved).await;
    if parts
        .iter()
        .any(|part| matches!(part, ContentPart::ImageUrl { .. }))
    {
        MessageContent::Parts(parts)
    } else {
        MessageContent::Text(content.to_string())
    }
}
