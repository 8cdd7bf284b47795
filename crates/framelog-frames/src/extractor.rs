use yaml_rust2::parser::{Event, Parser};

use framelog_types::{Frame, FramedDocument};

use crate::composer::Composer;
use crate::error::{BoxError, ExtractError};
use crate::stream::{SharedStream, TextStream};
use crate::tags::TagRegistry;

/// Pairs each YAML document in a message stream with the frame marker that
/// introduced it.
///
/// Messages are fed to a streaming YAML parser through a [`TextStream`],
/// which queues a frame for every marker line it passes along. Each finished
/// document pops one frame. A document only ends once the next document
/// starts or the stream ends, so on a live stream the newest document is
/// held until the following marker arrives.
///
/// In persistent mode malformed documents are logged and skipped; otherwise
/// the first one ends the sequence with an error.
pub struct FrameExtractor<I> {
    stream: SharedStream<I>,
    parser: Parser<SharedStream<I>>,
    composer: Composer,
    registry: TagRegistry,
    persistent: bool,
    finished: bool,

    /// Document-start count for the document being parsed
    doc_start: u64,
}

impl<I, E> FrameExtractor<I>
where
    I: Iterator<Item = Result<String, E>>,
    E: Into<BoxError>,
{
    pub fn new(messages: I) -> Self {
        Self::with_registry(messages, TagRegistry::with_defaults())
    }

    pub fn with_registry(messages: I, registry: TagRegistry) -> Self {
        let stream = SharedStream::new(TextStream::new(messages));
        Self {
            parser: Parser::new(stream.clone()),
            stream,
            composer: Composer::new(),
            registry,
            persistent: false,
            finished: false,
            doc_start: 0,
        }
    }

    /// Skip malformed documents instead of failing
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    fn pop_frame(&mut self) -> Frame {
        match self.stream.with(|s| s.pop_frame()) {
            Some(frame) => frame,
            None => {
                tracing::warn!("document without a pending frame, using the implicit frame");
                Frame::implicit()
            }
        }
    }

    /// Drop the failed document and start a fresh parser on the rest
    fn restart_parser(&mut self) {
        let doc_start = self.doc_start;
        let boundaries = self.stream.with(|s| {
            s.resync(doc_start);
            s.boundaries()
        });
        // whatever the parser sees next opens the following document
        self.doc_start = boundaries + 1;
        self.composer.begin();
        self.parser = Parser::new(self.stream.clone());
    }

    fn fail(&mut self, error: ExtractError) -> Option<Result<FramedDocument, ExtractError>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl<I, E> Iterator for FrameExtractor<I>
where
    I: Iterator<Item = Result<String, E>>,
    E: Into<BoxError>,
{
    type Item = Result<FramedDocument, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let event = match self.parser.next_token() {
                Ok((event, _)) => event,
                Err(e) => {
                    if let Some(source) = self.stream.with(|s| s.take_upstream_error()) {
                        return self.fail(ExtractError::Source(source));
                    }
                    if !self.persistent {
                        return self.fail(e.into());
                    }
                    tracing::warn!(error = %e, "skipping malformed document");
                    self.restart_parser();
                    continue;
                }
            };

            match event {
                Event::StreamEnd => {
                    self.finished = true;
                    return self
                        .stream
                        .with(|s| s.take_upstream_error())
                        .map(|source| Err(ExtractError::Source(source)));
                }
                Event::DocumentStart { .. } => {
                    self.doc_start = self.stream.with(|s| s.boundaries());
                    self.composer.begin();
                }
                Event::DocumentEnd => {
                    let frame = self.pop_frame();
                    match self.composer.finish() {
                        Ok(document) => {
                            tracing::debug!(%frame, "document extracted");
                            return Some(Ok(FramedDocument::new(frame, document)));
                        }
                        Err(e) if self.persistent => {
                            tracing::warn!(%frame, error = %e, "dropping malformed document");
                        }
                        Err(e) => return self.fail(e.into()),
                    }
                }
                Event::StreamStart | Event::Nothing => {}
                other => self.composer.feed(other, &self.registry),
            }
        }
    }
}
