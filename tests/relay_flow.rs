//! Integration tests for the relay: upstream registration, channel state
//! replay, detach and reattach.

mod common;

use common::{Conn, Harness, has};
use slbnc::hooks::{Hook, HookContext, HookReplies, Verdict};
use slbnc::state::{Request, keys};

/// Logged-in `bob` with a registered upstream; all output drained.
fn connected() -> (Harness, Conn, Conn) {
    let mut h = Harness::new();
    h.add_user("bob", false);
    let c = h.login("bob");
    let up = h.connect_upstream("bob");
    h.register_upstream(&up, "bob");
    c.lines();
    up.lines();
    (h, c, up)
}

#[test]
fn upstream_greeting_and_welcome() {
    let mut h = Harness::new();
    h.add_user("bob", false);
    h.set("bob", keys::REALNAME, "Bob Builder");
    let c = h.login("bob");
    c.lines();

    let up = h.connect_upstream("bob");
    assert_eq!(up.lines(), vec!["NICK bob", "USER bob 0 * :Bob Builder"]);
    assert!(has(&c.lines(), "Connected to irc.example.net, registering."));

    h.register_upstream(&up, "bob");
    let lines = c.lines();
    assert!(has(&lines, ":irc.example.net 001 bob :Welcome to ExampleNet bob"));
    assert!(has(&lines, "Connected to irc.example.net."));
    assert!(h.bouncer.upstream_handler("bob").unwrap().is_registered());
}

#[test]
fn server_password_is_sent_first() {
    let mut h = Harness::new();
    h.add_user("bob", false);
    h.set("bob", keys::SERVER_PASSWORD, "sekrit");
    let up = h.connect_upstream("bob");
    assert_eq!(up.lines().first().map(String::as_str), Some("PASS :sekrit"));
}

#[test]
fn client_lines_are_forwarded_and_ping_answered() {
    let (mut h, c, up) = connected();

    h.send(&c, "PRIVMSG #rust :hello");
    assert_eq!(up.lines(), vec!["PRIVMSG #rust :hello"]);

    h.send(&up, "PING :irc.example.net");
    assert_eq!(up.lines(), vec!["PONG :irc.example.net"]);
    assert!(c.lines().is_empty());
}

#[test]
fn names_and_topic_are_answered_from_cache() {
    let (mut h, c, up) = connected();

    h.send(&up, ":bob!~bob@host.example JOIN :#rust");
    h.send(&up, ":irc.example.net 332 bob #rust :Rust talk");
    h.send(&up, ":irc.example.net 333 bob #rust alice 1700000000");
    h.send(&up, ":irc.example.net 353 bob = #rust :@alice bob");
    h.send(&up, ":irc.example.net 366 bob #rust :End of /NAMES list.");
    assert_eq!(c.lines().len(), 5);
    assert_eq!(h.bouncer.user("bob").unwrap().channels().as_deref(), Some("#rust"));

    h.send(&c, "NAMES #rust");
    assert_eq!(
        c.lines(),
        vec![
            ":irc.example.net 353 bob = #rust :@alice bob",
            ":irc.example.net 366 bob #rust :End of /NAMES list.",
        ]
    );

    h.send(&c, "TOPIC #rust");
    assert_eq!(
        c.lines(),
        vec![
            ":irc.example.net 332 bob #rust :Rust talk",
            ":irc.example.net 333 bob #rust alice 1700000000",
        ]
    );
    assert!(up.lines().is_empty());

    // Unknown channels go to the network.
    h.send(&c, "NAMES #other");
    assert_eq!(up.lines(), vec!["NAMES #other"]);
}

/// Feed a full channel burst for `#c` plus the server's version.
fn cached_channel(h: &mut Harness, up: &Conn) {
    h.send(
        up,
        ":irc.example.net 005 bob CHANMODES=beI,k,l,imnst CHANTYPES=# NETWORK=ExampleNet PREFIX=(ov)@+ :are supported by this server",
    );
    h.send(up, ":bob!~bob@host.example JOIN :#c");
    h.send(up, ":irc.example.net 353 bob = #c :@alice +carol bob");
    h.send(up, ":irc.example.net 366 bob #c :End of /NAMES list.");
    h.send(up, ":irc.example.net 324 bob #c +nt");
    h.send(up, ":irc.example.net 329 bob #c 1600000000");
    h.send(up, ":irc.example.net 332 bob #c :Welcome to #c");
    h.send(up, ":irc.example.net 333 bob #c alice 1700000000");
    h.send(up, ":irc.example.net 351 bob exircd-1.0 irc.example.net :TS6ow");
}

#[test]
fn synth_answers_from_cache() {
    let (mut h, c, up) = connected();
    cached_channel(&mut h, &up);
    c.lines();
    up.lines();

    let names = vec![
        ":irc.example.net 353 bob = #c :@alice bob +carol".to_string(),
        ":irc.example.net 366 bob #c :End of /NAMES list.".to_string(),
    ];
    let modes = vec![
        ":irc.example.net 324 bob #c +nt".to_string(),
        ":irc.example.net 329 bob #c 1600000000".to_string(),
    ];
    let topic = vec![
        ":irc.example.net 332 bob #c :Welcome to #c".to_string(),
        ":irc.example.net 333 bob #c alice 1700000000".to_string(),
    ];
    let version = vec![
        ":irc.example.net 351 bob exircd-1.0 irc.example.net :TS6ow".to_string(),
        ":irc.example.net 005 bob CHANMODES=beI,k,l,imnst CHANTYPES=# NETWORK=ExampleNet PREFIX=(ov)@+ :are supported by this server".to_string(),
    ];

    h.send(&c, "SYNTH NAMES #c");
    assert_eq!(c.lines(), names);
    h.send(&c, "SYNTH MODE #c");
    assert_eq!(c.lines(), modes);
    h.send(&c, "SYNTH TOPIC #c");
    assert_eq!(c.lines(), topic);
    h.send(&c, "SYNTH VERSION");
    assert_eq!(c.lines(), version);

    h.send(&c, "NAMES #c");
    assert_eq!(c.lines(), names);
    h.send(&c, "MODE #c");
    assert_eq!(c.lines(), modes);
    h.send(&c, "TOPIC #c");
    assert_eq!(c.lines(), topic);
    h.send(&c, "VERSION");
    assert_eq!(c.lines(), version);

    assert!(up.lines().is_empty());
}

#[test]
fn synth_falls_back_to_the_network() {
    let (mut h, c, up) = connected();
    h.send(&up, ":bob!~bob@host.example JOIN :#d");
    h.send(&up, ":irc.example.net 353 bob = #d :alice bob");
    c.lines();
    up.lines();

    // No 324, no topic, names still arriving and no 351 yet.
    h.send(&c, "SYNTH MODE #d");
    h.send(&c, "TOPIC #d");
    h.send(&c, "NAMES #d");
    h.send(&c, "VERSION");
    assert_eq!(up.lines(), vec!["MODE #d", "TOPIC #d", "NAMES #d", "VERSION"]);
    assert!(c.lines().is_empty());

    // The network's answer is relayed and fills the cache.
    h.send(&up, ":irc.example.net 366 bob #d :End of /NAMES list.");
    assert_eq!(c.lines(), vec![":irc.example.net 366 bob #d :End of /NAMES list."]);
    h.send(&c, "NAMES #d");
    assert_eq!(
        c.lines(),
        vec![
            ":irc.example.net 353 bob = #d :alice bob",
            ":irc.example.net 366 bob #d :End of /NAMES list.",
        ]
    );
    assert!(up.lines().is_empty());
}

#[test]
fn whois_of_the_pseudo_nick_is_answered_locally() {
    let (mut h, c, up) = connected();
    h.send(&c, "WHOIS -slbnc");
    let version = env!("CARGO_PKG_VERSION");
    assert_eq!(
        c.lines(),
        vec![
            ":bnc.local 311 bob -slbnc -slbnc bnc.local * :slbnc control interface".to_string(),
            format!(":bnc.local 312 bob -slbnc bnc.local :slbnc {version}"),
            ":bnc.local 318 bob -slbnc :End of /WHOIS list.".to_string(),
        ]
    );
    assert!(up.lines().is_empty());
}

#[test]
fn synth_verb_reports_usage() {
    let (mut h, c, _up) = connected();
    h.send(&c, "SYNTH bogus");
    assert!(has(&c.lines(), "Syntax: SYNTH <mode|topic|names|version> [channel]"));
}

#[test]
fn part_forgets_the_channel() {
    let (mut h, c, up) = connected();
    h.send(&up, ":bob!~bob@host.example JOIN :#rust");
    h.send(&up, ":bob!~bob@host.example PART #rust :bye");
    c.lines();
    assert_eq!(h.bouncer.user("bob").unwrap().channels(), None);
    assert!(h.bouncer.upstream_handler("bob").unwrap().channel("#rust").is_none());
}

#[test]
fn detach_sets_away_and_reattach_replays() {
    let (mut h, c, up) = connected();
    h.set("bob", keys::AWAY_NICK, "bob_away");
    h.set("bob", keys::AWAY, "gone fishing");
    h.send(&up, ":bob!~bob@host.example JOIN :#rust");
    c.lines();

    h.send(&c, "QUIT");
    assert!(c.peer.is_closed());
    assert_eq!(up.lines(), vec!["NICK bob_away", "AWAY :gone fishing"]);

    h.send(&up, ":bob!~bob@host.example NICK :bob_away");
    h.send(&up, ":alice!al@example.org PRIVMSG bob_away :are you there?");

    let back = h.login("bob");
    let burst = back.lines();
    assert!(has(&burst, ":irc.example.net 001 bob :Welcome back to slbnc, bob_away"));
    assert!(has(&burst, ":bob NICK :bob_away"));
    assert!(has(&burst, ":bob_away!~bob@host.example JOIN :#rust"));
    assert!(has(&burst, "You have new messages."));
    assert_eq!(up.lines(), vec!["TOPIC #rust", "NAMES #rust", "NICK bob", "AWAY"]);

    h.send(&back, "SLBNC read");
    let lines = back.lines();
    assert!(has(&lines, "alice!al@example.org: are you there?"));
    assert!(has(&lines, "End of messages."));
}

#[test]
fn lost_upstream_reconnects() {
    let (mut h, c, up) = connected();

    up.peer.hang_up();
    h.bouncer.on_readable(up.id, h.now);
    h.flush();
    assert!(has(&c.lines(), "Lost connection to the IRC server."));
    assert_eq!(h.bouncer.user("bob").unwrap().upstream(), None);
    h.bouncer.take_requests();

    h.tick(1);
    assert!(h.bouncer.take_requests().is_empty());

    h.tick(5);
    let requests = h.bouncer.take_requests();
    assert!(
        requests
            .iter()
            .any(|r| matches!(r, Request::ResolveHost { host, .. } if host == "irc.example.net"))
    );
}

#[test]
fn perror_closes_upstream_without_reconnect() {
    let (mut h, c, up) = connected();

    h.send(&c, "PERROR :taking a break");
    assert_eq!(up.lines(), vec!["QUIT :taking a break"]);
    assert!(up.peer.is_closed());

    h.tick(120);
    let requests = h.bouncer.take_requests();
    assert!(!requests.iter().any(|r| matches!(r, Request::ResolveHost { .. })));
}

#[test]
fn error_with_throttle_waits_longer() {
    let (mut h, _c, up) = connected();

    h.send(&up, "ERROR :Closing Link: bob (Throttled: Reconnecting too fast)");
    up.peer.hang_up();
    h.bouncer.on_readable(up.id, h.now);
    h.bouncer.take_requests();

    h.tick(10);
    assert!(h.bouncer.take_requests().is_empty());
    h.tick(45);
    assert!(!h.bouncer.take_requests().is_empty());
}

#[test]
fn detached_upstream_output_is_paced() {
    let (mut h, c, up) = connected();
    h.send(&c, "QUIT");
    up.lines();

    h.send(&up, "PING :one");
    assert_eq!(up.lines(), vec!["PONG :one"]);

    h.send(&up, "PING :two");
    assert_eq!(up.lines(), Vec::<String>::new());
    h.tick(1);
    assert_eq!(up.lines(), vec!["PONG :two"]);
}

/// Refuses every line with the given verb, in both directions.
struct Refuse(&'static str);

impl Refuse {
    fn verdict(&self, ctx: &HookContext<'_, '_>) -> Verdict {
        if ctx.line.is(self.0) {
            Verdict::Deny
        } else {
            Verdict::Allow
        }
    }
}

impl Hook for Refuse {
    fn name(&self) -> &'static str {
        "refuse"
    }

    fn intercept_outbound(&mut self, ctx: &HookContext<'_, '_>, _replies: &mut HookReplies) -> Verdict {
        self.verdict(ctx)
    }

    fn intercept_inbound(&mut self, ctx: &HookContext<'_, '_>, _replies: &mut HookReplies) -> Verdict {
        self.verdict(ctx)
    }
}

#[test]
fn denied_client_lines_are_not_forwarded() {
    let (mut h, c, up) = connected();
    h.bouncer.add_hook(Box::new(Refuse("PRIVMSG")));

    h.send(&c, "PRIVMSG #rust :keep this to yourself");
    assert!(up.lines().is_empty());

    h.send(&c, "NOTICE #rust :this one is fine");
    assert_eq!(up.lines(), vec!["NOTICE #rust :this one is fine"]);
}

#[test]
fn denied_upstream_lines_still_update_state() {
    let (mut h, c, up) = connected();
    h.bouncer.add_hook(Box::new(Refuse("JOIN")));

    h.send(&up, ":bob!~bob@host.example JOIN :#rust");
    assert!(c.lines().is_empty());
    assert!(h.bouncer.upstream_handler("bob").unwrap().channel("#rust").is_some());
    assert_eq!(h.bouncer.user("bob").unwrap().channels().as_deref(), Some("#rust"));
}

#[test]
fn ctcp_module_answers_while_detached() {
    let (mut h, c, up) = connected();
    assert!(h.bouncer.load_module("ctcp").is_some());

    h.send(&up, ":alice!al@example.org PRIVMSG bob :\x01VERSION\x01");
    assert!(has(&c.lines(), "PRIVMSG bob :\x01VERSION\x01"));
    assert!(up.lines().is_empty());

    h.send(&c, "QUIT");
    up.lines();
    h.send(&up, ":alice!al@example.org PRIVMSG bob :\x01VERSION\x01");
    h.tick(1);
    let version = env!("CARGO_PKG_VERSION");
    assert_eq!(up.lines(), vec![format!("NOTICE alice :\x01VERSION slbnc {version}\x01")]);
}

#[test]
fn nick_is_stored_once_the_network_accepts_it() {
    let (mut h, c, up) = connected();

    h.send(&c, "NICK robert");
    assert_eq!(up.lines(), vec!["NICK robert"]);
    h.send(&up, ":irc.example.net 433 bob robert :Nickname is already in use");
    assert!(has(&c.lines(), " 433 bob robert "));
    assert_eq!(h.bouncer.user("bob").unwrap().setting(keys::NICK), None);

    h.send(&c, "NICK roberto");
    h.send(&up, ":bob!~bob@host.example NICK :roberto");
    assert!(has(&c.lines(), ":bob!~bob@host.example NICK :roberto"));
    assert_eq!(h.bouncer.user("bob").unwrap().setting(keys::NICK).as_deref(), Some("roberto"));
}
