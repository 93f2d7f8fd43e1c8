//! Line interceptors.
//!
//! Every parsed line, in both directions, is offered to the [`HookChain`]
//! before the bouncer acts on it. The first hook to answer
//! [`Verdict::Deny`] suppresses the default handling of that line.
//!
//! Hooks are statically registered objects; the [`ModuleCatalog`] maps the
//! names accepted by `insmod` to their constructors.

use slbnc_proto::LineRef;
use std::collections::BTreeMap;

/// Whether the default handling of a line may proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

/// Direction of a line relative to the bouncer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// From the user's client, headed for the network.
    Outbound,
    /// From the network.
    Inbound,
}

/// What a hook sees.
pub struct HookContext<'a, 'l> {
    /// Bouncer user the line belongs to; empty before login.
    pub user: &'a str,
    /// The user's current nick on the network.
    pub nick: &'a str,
    /// Whether a client is attached.
    pub attached: bool,
    pub line: &'a LineRef<'l>,
}

/// Lines a hook wants sent as a side effect.
#[derive(Debug, Default)]
pub struct HookReplies {
    pub upstream: Vec<String>,
    pub client: Vec<String>,
}

/// An interceptor. Both methods default to allowing the line.
pub trait Hook {
    fn name(&self) -> &'static str;

    fn intercept_outbound(&mut self, _ctx: &HookContext<'_, '_>, _replies: &mut HookReplies) -> Verdict {
        Verdict::Allow
    }

    fn intercept_inbound(&mut self, _ctx: &HookContext<'_, '_>, _replies: &mut HookReplies) -> Verdict {
        Verdict::Allow
    }
}

/// Ordered interceptors with stable numeric ids.
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<(usize, Box<dyn Hook>)>,
    next_id: usize,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; returns its id.
    pub fn push(&mut self, hook: Box<dyn Hook>) -> usize {
        self.next_id += 1;
        self.hooks.push((self.next_id, hook));
        self.next_id
    }

    /// Remove the hook with `id`.
    pub fn remove(&mut self, id: usize) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(hook_id, _)| *hook_id != id);
        self.hooks.len() != before
    }

    /// `(id, name)` of each loaded hook, in interception order.
    pub fn list(&self) -> Vec<(usize, &'static str)> {
        self.hooks.iter().map(|(id, hook)| (*id, hook.name())).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Offer a line to each hook in order, stopping at the first denial.
    pub fn offer(
        &mut self,
        direction: Direction,
        ctx: &HookContext<'_, '_>,
        replies: &mut HookReplies,
    ) -> Verdict {
        for (_, hook) in &mut self.hooks {
            let verdict = match direction {
                Direction::Outbound => hook.intercept_outbound(ctx, replies),
                Direction::Inbound => hook.intercept_inbound(ctx, replies),
            };
            if verdict == Verdict::Deny {
                return Verdict::Deny;
            }
        }
        Verdict::Allow
    }
}

/// Constructors for the modules `insmod` can load.
pub struct ModuleCatalog {
    factories: BTreeMap<&'static str, fn() -> Box<dyn Hook>>,
}

impl ModuleCatalog {
    /// Catalog of the modules shipped with the bouncer.
    pub fn builtin() -> Self {
        let mut factories: BTreeMap<&'static str, fn() -> Box<dyn Hook>> = BTreeMap::new();
        factories.insert("ctcp", CtcpResponder::boxed);
        Self { factories }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name.to_ascii_lowercase().as_str())
    }

    /// Instantiate a module by name.
    pub fn create(&self, name: &str) -> Option<Box<dyn Hook>> {
        self.factories
            .get(name.to_ascii_lowercase().as_str())
            .map(|make| make())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

// ============================================================================
// Built-in modules
// ============================================================================

/// Answers CTCP VERSION, PING and TIME for a detached user.
pub struct CtcpResponder;

impl CtcpResponder {
    fn boxed() -> Box<dyn Hook> {
        Box::new(CtcpResponder)
    }
}

impl Hook for CtcpResponder {
    fn name(&self) -> &'static str {
        "ctcp"
    }

    fn intercept_inbound(&mut self, ctx: &HookContext<'_, '_>, replies: &mut HookReplies) -> Verdict {
        if ctx.attached || !ctx.line.is("PRIVMSG") {
            return Verdict::Allow;
        }
        let (Some(target), Some(text), Some(from)) =
            (ctx.line.arg(0), ctx.line.arg(1), ctx.line.source_nick())
        else {
            return Verdict::Allow;
        };
        if !target.eq_ignore_ascii_case(ctx.nick) {
            return Verdict::Allow;
        }
        let Some(body) = text.strip_prefix('\x01').map(|t| t.trim_end_matches('\x01')) else {
            return Verdict::Allow;
        };

        let (command, arg) = body.split_once(' ').unwrap_or((body, ""));
        let answer = match command.to_ascii_uppercase().as_str() {
            "VERSION" => format!("VERSION slbnc {}", env!("CARGO_PKG_VERSION")),
            "PING" => format!("PING {arg}"),
            "TIME" => format!("TIME {}", chrono::Local::now().to_rfc2822()),
            _ => return Verdict::Allow,
        };
        replies
            .upstream
            .push(format!("NOTICE {from} :\x01{}\x01", answer.trim_end()));
        Verdict::Deny
    }
}
