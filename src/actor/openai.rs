//! Actor backed by an OpenAI-compatible HTTP API.

use super::{dereference_local, Actor, ActorContext};
use crate::api::{ChatRequest, ImageRequest, ImageResponse};
use crate::core::chat_stream::{format_api_error, spawn_chat_stream, StreamParams};
use crate::core::conversation::{
    uts_2sau, uts_lastfullref, ActorName, ActorOptions, ActorView, Conversation, Intention,
    Modality, ModelName, Sau, SauCache, Utterance,
};
use crate::core::error::{ConversationError, ReferenceError};
use crate::core::keyring::{resolve_api_key, stored_api_key};
use crate::core::logger::Logger;
use crate::core::reference::Reference;
use crate::core::stream::{Content, ContentSource, Stream, StreamKind};
use crate::utils::url::{construct_api_url, resolve_base_url};
use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub const PROVIDER: &str = "openai";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
const API_KEY_ENV: &str = "OPENAI_API_KEY";
const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

pub fn create(
    name: ModelName,
    opts: ActorOptions,
    ctx: &ActorContext,
) -> Result<Box<dyn Actor>, ConversationError> {
    Ok(Box::new(OpenAiActor::new(name, opts, ctx)?))
}

fn build_client(proxy: Option<&str>) -> Result<reqwest::Client, ConversationError> {
    let mut builder = reqwest::Client::builder();
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
            ConversationError::provider(PROVIDER, format!("invalid proxy '{proxy}': {e}"))
        })?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| ConversationError::provider(PROVIDER, e.to_string()))
}

/// Where image `n` generated for `prompt` is saved.
pub fn image_path(dir: &Path, prompt: &str, n: usize) -> PathBuf {
    dir.join(format!("{:08x}_{n}.png", crc32fast::hash(prompt.as_bytes())))
}

pub struct OpenAiActor {
    name: ActorName,
    model: ModelName,
    opts: ActorOptions,
    logger: Logger,
    client: reqwest::Client,
    base_url: String,
    default_image_dir: PathBuf,
    watermark: usize,
    cache: SauCache,
    last_reply: Option<Stream>,
}

impl OpenAiActor {
    pub fn new(
        model: ModelName,
        opts: ActorOptions,
        ctx: &ActorContext,
    ) -> Result<Self, ConversationError> {
        let name = ActorName::Model(model.clone());
        let mut logger = ctx.logger.for_label(name.to_string());
        logger.set_local_verbosity(opts.verbosity);
        let client = build_client(opts.proxy.as_deref())?;
        let base_url = resolve_base_url(ctx.base_url.as_deref(), std::env::var(BASE_URL_ENV).ok());
        logger.dbg(format!("Using endpoint {base_url}"));
        Ok(Self {
            name,
            model,
            opts,
            logger,
            client,
            base_url,
            default_image_dir: ctx.image_dir.clone(),
            watermark: 0,
            cache: SauCache::default(),
            last_reply: None,
        })
    }

    fn chat_model(&self) -> &str {
        match self.model.model.as_str() {
            "default" => DEFAULT_CHAT_MODEL,
            other => other,
        }
    }

    fn image_model(&self) -> &str {
        match self.model.model.as_str() {
            "default" => DEFAULT_IMAGE_MODEL,
            other => other,
        }
    }

    fn image_dir(&self) -> &Path {
        self.opts
            .image_dir
            .as_deref()
            .unwrap_or(&self.default_image_dir)
    }

    fn api_key(&self) -> Result<String, ConversationError> {
        resolve_api_key(
            self.opts.apikey.as_deref(),
            &self.model.provider,
            std::env::var(API_KEY_ENV).ok(),
            stored_api_key,
            &self.logger,
        )
        .ok_or_else(|| {
            ConversationError::provider(
                self.name.to_string(),
                format!("no API key, use /set model apikey or set {API_KEY_ENV}"),
            )
        })
    }

    /// Bring the message list up to date with the conversation.
    ///
    /// Streams newer than the watermark are drained first so their text is
    /// complete; older prefixes come from the cache.
    async fn messages(&mut self, cnv: &Conversation) -> Result<Sau, ConversationError> {
        assert!(
            self.watermark <= cnv.len(),
            "{} watermark {} is past the end of the conversation",
            self.name,
            self.watermark
        );
        for ut in &cnv.utterances()[self.watermark..] {
            if let Some(contents) = &ut.contents {
                contents.collect().await?;
            }
        }
        let names = HashMap::from([
            (self.name.clone(), "assistant".to_string()),
            (ActorName::User, "user".to_string()),
        ]);
        let messages = uts_2sau(
            cnv.utterances(),
            &names,
            "user",
            self.opts.prompt.as_deref(),
            Some(&mut self.cache),
        );
        self.watermark = cnv.len();
        self.logger.dbg(format!("Sending {} messages", messages.len()));
        Ok(messages)
    }

    fn chat(&self, messages: Sau, api_key: String) -> Stream {
        let token = CancellationToken::new();
        let source = spawn_chat_stream(StreamParams {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key,
            provider_name: self.name.to_string(),
            request: ChatRequest {
                model: self.chat_model().to_string(),
                messages,
                stream: true,
                temperature: self.opts.temperature,
                seed: self.opts.seed,
            },
            cancel_token: token.clone(),
        });
        Stream::builder(source)
            .token(token)
            .kind(StreamKind::Text)
            .owner(self.name.clone())
            .build()
    }

    /// One image arrives as a binary stream; several are saved and referenced.
    fn images(&self, prompt: String, api_key: String) -> Stream {
        let n = self.opts.image_count.unwrap_or(1).max(1);
        let dir = self.image_dir().to_path_buf();
        let request = ImageRequest {
            model: self.image_model().to_string(),
            prompt: prompt.clone(),
            n,
            size: self.opts.image_size.clone(),
            response_format: "b64_json".to_string(),
        };
        let fetch = fetch_images(
            self.client.clone(),
            construct_api_url(&self.base_url, "images/generations"),
            api_key,
            request,
            self.name.to_string(),
        );
        let builder = if n == 1 {
            let provider = self.name.to_string();
            let source = stream::once(async move {
                let image = fetch.await?.into_iter().next().ok_or_else(|| {
                    ConversationError::provider(provider, "response contains no image")
                })?;
                Ok::<_, ConversationError>(Content::Binary(image))
            })
            .boxed();
            Stream::builder(source)
                .kind(StreamKind::Binary)
                .suggested_fname(image_path(&dir, &prompt, 0))
        } else {
            let source = stream::once(async move {
                let images = fetch.await?;
                std::fs::create_dir_all(&dir).map_err(|e| ReferenceError::io(&dir, e))?;
                let mut refs = Vec::with_capacity(images.len());
                for (i, image) in images.into_iter().enumerate() {
                    let path = image_path(&dir, &prompt, i);
                    std::fs::write(&path, image).map_err(|e| ReferenceError::io(&path, e))?;
                    refs.push(Content::Ref(Reference::local(path)));
                }
                Ok::<_, ConversationError>(refs)
            })
            .flat_map(|res| {
                let items = match res {
                    Ok(refs) => refs.into_iter().map(Ok).collect(),
                    Err(err) => vec![Err(err)],
                };
                stream::iter(items)
            })
            .boxed();
            Stream::builder(source)
        };
        builder.owner(self.name.clone()).build()
    }
}

async fn fetch_images(
    client: reqwest::Client,
    url: String,
    api_key: String,
    request: ImageRequest,
    provider: String,
) -> Result<Vec<Vec<u8>>, ConversationError> {
    let fail = |message: String| ConversationError::provider(&provider, message);
    let response = client
        .post(url)
        .bearer_auth(&api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| fail(format_api_error(&e.to_string())))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| fail(format_api_error(&e.to_string())))?;
    if !status.is_success() {
        return Err(fail(format!("{} ({status})", format_api_error(&body))));
    }
    let parsed: ImageResponse = serde_json::from_str(&body)
        .map_err(|e| fail(format!("malformed image response: {e}")))?;

    let mut images = Vec::with_capacity(parsed.data.len());
    for data in parsed.data {
        let bytes = match (data.b64_json, data.url) {
            (Some(b64), _) => base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .map_err(|e| fail(format!("malformed image payload: {e}")))?,
            (None, Some(url)) => fetch_bytes(&client, &url)
                .await
                .map_err(|e| fail(format_api_error(&e.to_string())))?,
            (None, None) => return Err(fail("image entry has neither data nor url".into())),
        };
        images.push(bytes);
    }
    Ok(images)
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

fn remote_source(
    client: reqwest::Client,
    url: String,
    textual: bool,
    provider: String,
) -> ContentSource {
    stream::once(async move {
        let bytes = fetch_bytes(&client, &url)
            .await
            .map_err(|e| ConversationError::provider(provider, format!("{url}: {e}")))?;
        Ok::<_, ConversationError>(if textual {
            Content::Text(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Content::Binary(bytes)
        })
    })
    .boxed()
}

#[async_trait]
impl Actor for OpenAiActor {
    fn name(&self) -> &ActorName {
        &self.name
    }

    async fn react(
        &mut self,
        _view: &ActorView,
        cnv: &Conversation,
    ) -> Result<Utterance, ConversationError> {
        let messages = self.messages(cnv).await?;
        let contents = match (&self.last_reply, self.opts.replay) {
            (Some(last), true) => {
                self.logger.info("Replaying the last response");
                Stream::from_items(last.snapshot())
            }
            _ => {
                let api_key = self.api_key()?;
                match self.opts.modality {
                    Modality::Text => self.chat(messages, api_key),
                    Modality::Image => {
                        let uid = uts_lastfullref(cnv.utterances(), &self.name).ok_or_else(|| {
                            ConversationError::NoContext(format!(
                                "nothing was addressed to {} to draw",
                                self.name
                            ))
                        })?;
                        let prompt = cnv.utterances()[uid].text();
                        self.images(prompt, api_key)
                    }
                }
            }
        };
        self.last_reply = Some(contents.clone());
        Ok(Utterance::new(self.name.clone(), Intention::to(ActorName::User)).with_contents(contents))
    }

    fn reset(&mut self) {
        self.watermark = 0;
        self.cache = SauCache::default();
        self.last_reply = None;
    }

    fn set_options(&mut self, opts: ActorOptions) {
        if opts.proxy != self.opts.proxy {
            match build_client(opts.proxy.as_deref()) {
                Ok(client) => self.client = client,
                Err(err) => self.logger.err(err),
            }
        }
        self.logger.set_local_verbosity(opts.verbosity);
        self.opts = opts;
    }

    fn get_options(&self) -> ActorOptions {
        self.opts.clone()
    }

    fn dereference(&self, reference: &Reference) -> Result<Stream, ConversationError> {
        match reference {
            Reference::Remote { url, .. } => {
                let textual = reference.is_textual();
                let source =
                    remote_source(self.client.clone(), url.clone(), textual, self.name.to_string());
                let kind = if textual {
                    StreamKind::Text
                } else {
                    StreamKind::Binary
                };
                Ok(Stream::builder(source).kind(kind).owner(self.name.clone()).build())
            }
            other => dereference_local(&self.name, other),
        }
    }
}
