//! Caching grammar resolver.
//!
//! Maps a grammar reference to a compiled grammar, compiling at most once
//! per distinct identity. Locking is two-level: a coarse map lock guards
//! entry lookup and creation only (held for O(1) time), and a per-entry
//! lock serializes compilation of one identity while unrelated identities
//! compile concurrently. A second caller blocking on the entry lock
//! observes the already completed result instead of recompiling.
//!
//! The reserved bootstrap identities are intercepted before any cache
//! lookup. Failed compilations are cached like successful ones, so the
//! attempt is not repeated, but the cached grammar carries its error list
//! and is unusable. Opening a reference goes through the [`ResourceOpener`]
//! seam; any opener or pipeline failure is wrapped into a fatal error and
//! reported through the compiler's `fail`, never propagated as a crash, so
//! one unreachable import cannot take down the resolution loop.

use crate::etl::cell::Cell;
use crate::etl::errors::{codes, ErrorInfo, SourceLocation};
use crate::etl::grammar::bootstrap::BootstrapSet;
use crate::etl::grammar::compiler::GrammarCompiler;
use crate::etl::grammar::CompiledGrammar;
use crate::etl::pipeline::TermPipeline;
use crate::etl::position::Position;
use crate::etl::protocol::ParseResult;
use crate::etl::resource::{ResolvedObject, ResourceReference, ResourceRequest};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A successfully opened resource: the text and where it actually came
/// from.
#[derive(Debug, Clone)]
pub struct OpenedResource {
    pub system_id: String,
    pub text: String,
}

/// How references are turned into character streams. Resolution strategy
/// (filesystem, bundled, in-memory) is outside the core; only the result
/// crosses this boundary.
pub trait ResourceOpener: Send + Sync {
    fn open(&self, reference: &ResourceReference) -> Result<OpenedResource, ErrorInfo>;
}

/// Opens system ids as filesystem paths.
#[derive(Debug, Default)]
pub struct FileOpener;

impl ResourceOpener for FileOpener {
    fn open(&self, reference: &ResourceReference) -> Result<OpenedResource, ErrorInfo> {
        let system_id = reference.system_id.as_deref().ok_or_else(|| {
            ErrorInfo::new(
                codes::RESOURCE_UNREADABLE,
                vec![reference.to_string(), "no system id".into()],
                SourceLocation::new(reference.identity(), Position::start()),
            )
        })?;
        match fs::read_to_string(system_id) {
            Ok(text) => Ok(OpenedResource {
                system_id: system_id.to_string(),
                text,
            }),
            Err(io_error) => Err(ErrorInfo::new(
                codes::RESOURCE_UNREADABLE,
                vec![system_id.to_string(), io_error.to_string()],
                SourceLocation::new(system_id, Position::start()),
            )),
        }
    }
}

/// A resolved grammar as handed out by the resolver.
pub type ResolvedGrammar = ResolvedObject<Arc<CompiledGrammar>>;

struct CacheEntry {
    slot: Mutex<Option<Arc<ResolvedGrammar>>>,
}

thread_local! {
    // identities this thread is currently compiling; a re-entrant request
    // for one of them is a cyclic import
    static IN_FLIGHT: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Grammar cache with single-flight compilation per identity.
pub struct GrammarResolver {
    bootstrap: Arc<BootstrapSet>,
    opener: Arc<dyn ResourceOpener>,
    entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
    compile_count: AtomicUsize,
}

impl GrammarResolver {
    /// Resolver over the filesystem opener and the shared bootstrap set.
    pub fn new() -> Self {
        GrammarResolver::with_opener(Arc::new(FileOpener))
    }

    pub fn with_opener(opener: Arc<dyn ResourceOpener>) -> Self {
        GrammarResolver {
            bootstrap: BootstrapSet::shared(),
            opener,
            entries: Mutex::new(HashMap::new()),
            compile_count: AtomicUsize::new(0),
        }
    }

    pub fn bootstrap(&self) -> &BootstrapSet {
        &self.bootstrap
    }

    /// How many underlying compilations have run. One per identity when
    /// single-flight holds, however many callers raced.
    pub fn compile_count(&self) -> usize {
        self.compile_count.load(Ordering::SeqCst)
    }

    /// Resolve a grammar reference. The call itself does not fail: opener
    /// and compilation problems surface as an unusable grammar whose error
    /// list explains what happened.
    pub fn resolve(&self, request: ResourceRequest) -> Arc<ResolvedGrammar> {
        // reserved identities bypass the cache entirely
        if let Some(public_id) = request.reference.public_id.as_deref() {
            if let Some(grammar) = self.bootstrap.lookup_public(public_id) {
                let descriptor = grammar.descriptor.clone();
                return Arc::new(ResolvedObject::new(request, descriptor, grammar));
            }
        }

        let identity = request.reference.identity().to_string();

        let cyclic = IN_FLIGHT.with(|set| set.borrow().contains(&identity));
        if cyclic {
            let error = ErrorInfo::new(
                codes::IMPORT_FAILED,
                vec![identity.clone(), "cyclic grammar import".into()],
                SourceLocation::new(&identity, Position::start()),
            );
            return Arc::new(self.failed_attempt(request, error));
        }

        let entry = {
            let mut entries = self.entries.lock().expect("resolver map lock");
            Arc::clone(
                entries
                    .entry(identity.clone())
                    .or_insert_with(|| {
                        Arc::new(CacheEntry {
                            slot: Mutex::new(None),
                        })
                    }),
            )
        };

        let mut slot = entry.slot.lock().expect("resolver entry lock");
        if let Some(cached) = slot.as_ref() {
            return Arc::clone(cached);
        }

        IN_FLIGHT.with(|set| set.borrow_mut().insert(identity.clone()));
        let result = Arc::new(self.compile(request));
        IN_FLIGHT.with(|set| {
            set.borrow_mut().remove(&identity);
        });

        *slot = Some(Arc::clone(&result));
        result
    }

    /// Open the reference, run the full pipeline over it, and drive the
    /// compiler engine to completion, resolving transitive imports through
    /// this same resolver.
    fn compile(&self, request: ResourceRequest) -> ResolvedGrammar {
        self.compile_count.fetch_add(1, Ordering::SeqCst);

        let opened = match self.opener.open(&request.reference) {
            Ok(opened) => opened,
            Err(error) => return self.failed_attempt(request, error),
        };

        let mut pipeline = TermPipeline::with_resolver(&opened.system_id, self);
        pipeline.push_chunk(&opened.text);

        let mut compiler = GrammarCompiler::new();
        compiler.start(request.clone());

        let mut events: Cell<crate::etl::term::TermToken> = Cell::new();
        let mut pipeline_done = false;
        loop {
            match compiler.process(&mut events, pipeline_done) {
                ParseResult::InputNeeded => match pipeline.parse(true) {
                    ParseResult::OutputAvailable => events.put(pipeline.read()),
                    ParseResult::Eof => pipeline_done = true,
                    ParseResult::InputNeeded => {
                        // the whole text was pushed up front
                        pipeline_done = true;
                    }
                    ParseResult::ResourceNeeded => {
                        unreachable!("pipeline with a resolver resolves inline")
                    }
                },
                ParseResult::ResourceNeeded => {
                    for child_request in compiler.requests().to_vec() {
                        let resolved = self.resolve(child_request.clone());
                        if resolved.object.is_usable() {
                            compiler.provide((*resolved).clone(), vec![]);
                        } else {
                            let error = resolved.object.errors.first().cloned().unwrap_or_else(
                                || {
                                    ErrorInfo::new(
                                        codes::IMPORT_FAILED,
                                        vec![child_request.reference.to_string()],
                                        SourceLocation::new(
                                            &opened.system_id,
                                            Position::start(),
                                        ),
                                    )
                                },
                            );
                            compiler.fail(&child_request, resolved.usages.clone(), error);
                        }
                    }
                }
                ParseResult::OutputAvailable => return compiler.read(),
                ParseResult::Eof => {
                    // the compiler finishes through OutputAvailable first
                    unreachable!("compiler reached Eof without producing output")
                }
            }
        }
    }

    /// An unusable cached attempt for a reference that could not even be
    /// opened or that closed an import cycle.
    fn failed_attempt(&self, request: ResourceRequest, error: ErrorInfo) -> ResolvedGrammar {
        use crate::etl::grammar::builder::GrammarBuilder;
        use crate::etl::grammar::GrammarId;
        let identity = request.reference.identity().to_string();
        let mut builder = GrammarBuilder::new(GrammarId::new(identity.clone(), "0.0"), identity);
        builder.record_error(error);
        let grammar = builder.build();
        let descriptor = grammar.descriptor.clone();
        ResolvedObject::new(request, descriptor, Arc::new(grammar))
    }
}

impl Default for GrammarResolver {
    fn default() -> Self {
        GrammarResolver::new()
    }
}
