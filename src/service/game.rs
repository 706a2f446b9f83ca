//! # Game Coordinator
//!
//! Server-side state for two-player games played on a 3x3 board.
//!
//! ```text
//! J (pending) --j accept--> IN_PROGRESS --line--> WIN/LOSS  (removed)
//!            \--j decline--> cleared    \--full--> DRAW     (removed)
//!                                        \--disconnect--> ABORTED (removed)
//! ```
//!
//! The inviter plays `X` and moves first. Every operation computes its
//! deliveries while holding the game lock, releases it, and only then routes
//! them through the [`Registry`], so the two locks are never held together.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Board, GameResult, Mark, Message, BOARD_CELLS};
use crate::service::registry::Registry;
use crate::utils::metrics::global_metrics;

/// Unordered pair of players, stored sorted.
pub type GameKey = (String, String);

fn game_key(a: &str, b: &str) -> GameKey {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// One game in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSession {
    inviter: String,
    invitee: String,
    board: Board,
    turn: String,
}

impl GameSession {
    fn new(inviter: &str, invitee: &str) -> Self {
        Self {
            inviter: inviter.to_string(),
            invitee: invitee.to_string(),
            board: Board::new(),
            turn: inviter.to_string(),
        }
    }

    pub fn inviter(&self) -> &str {
        &self.inviter
    }

    pub fn invitee(&self) -> &str {
        &self.invitee
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Identity expected to move next
    pub fn turn(&self) -> &str {
        &self.turn
    }

    /// Fixed symbol of `player` for the whole game.
    pub fn mark_of(&self, player: &str) -> Mark {
        if player == self.inviter {
            Mark::A
        } else {
            Mark::B
        }
    }

    pub fn opponent_of(&self, player: &str) -> &str {
        if player == self.inviter {
            &self.invitee
        } else {
            &self.inviter
        }
    }

    fn board_message(&self) -> Arc<Message> {
        Arc::new(Message::Board {
            board: self.board,
            turn: self.turn.clone(),
        })
    }
}

#[derive(Debug, Default)]
struct GameTable {
    games: HashMap<GameKey, GameSession>,
    /// Player to the key of the game they are in
    playing: HashMap<String, GameKey>,
    /// (inviter, invitee)
    invites: HashSet<(String, String)>,
}

impl GameTable {
    fn remove_game(&mut self, key: &GameKey) -> Option<GameSession> {
        let session = self.games.remove(key)?;
        self.playing.remove(&session.inviter);
        self.playing.remove(&session.invitee);
        global_metrics().game_finished();
        Some(session)
    }
}

type Deliveries = Vec<(String, Arc<Message>)>;

/// Owns every game and pending invite.
#[derive(Debug)]
pub struct GameCoordinator {
    registry: Arc<Registry>,
    table: Mutex<GameTable>,
}

impl GameCoordinator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            table: Mutex::new(GameTable::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, GameTable>> {
        self.table
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))
    }

    fn deliver(&self, deliveries: Deliveries) {
        for (identity, msg) in deliveries {
            if let Err(e) = self.registry.unicast(&identity, msg) {
                debug!(identity = %identity, error = %e, "Game delivery not routed");
            }
        }
    }

    /// Number of games in progress
    pub fn active_games(&self) -> Result<usize> {
        Ok(self.lock()?.games.len())
    }

    /// Whether `inviter` has an unanswered invite out to `invitee`
    pub fn has_pending_invite(&self, inviter: &str, invitee: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .invites
            .contains(&(inviter.to_string(), invitee.to_string())))
    }

    /// Snapshot of the game `player` is in, if any.
    pub fn session_of(&self, player: &str) -> Result<Option<GameSession>> {
        let table = self.lock()?;
        Ok(table
            .playing
            .get(player)
            .and_then(|key| table.games.get(key))
            .cloned())
    }

    /// `from` invites `to`; the invite is forwarded with `from` as its peer.
    pub fn invite(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Err(ProtocolError::UnexpectedMessage);
        }
        if !self.registry.contains(to)? {
            return Err(ProtocolError::UserNotFound(to.to_string()));
        }
        let invite = (from.to_string(), to.to_string());
        self.lock()?.invites.insert(invite.clone());

        // `to` may have left after the first check, with its invites already
        // cleared; a teardown that starts later still sees this entry
        if !self.registry.contains(to)? {
            self.lock()?.invites.remove(&invite);
            return Err(ProtocolError::UserNotFound(to.to_string()));
        }

        debug!(from, to, "Game invite");
        self.deliver(vec![(
            to.to_string(),
            Arc::new(Message::GameInvite {
                peer: from.to_string(),
            }),
        )]);
        Ok(())
    }

    /// `responder` answers the invite sent by `inviter`.
    ///
    /// The response is forwarded to the inviter. On accept a game starts with
    /// the inviter to move and both players receive the empty board.
    pub fn respond(&self, responder: &str, inviter: &str, accept: bool) -> Result<()> {
        if !self.registry.contains(inviter)? {
            return Err(ProtocolError::UserNotFound(inviter.to_string()));
        }

        let invite = (inviter.to_string(), responder.to_string());
        let mut deliveries: Deliveries = Vec::with_capacity(3);
        {
            let mut table = self.lock()?;
            if !table.invites.contains(&invite) {
                return Err(ProtocolError::NoPendingInvite(inviter.to_string()));
            }
            if accept
                && (table.playing.contains_key(inviter) || table.playing.contains_key(responder))
            {
                return Err(ProtocolError::GameInProgress);
            }
            table.invites.remove(&invite);

            deliveries.push((
                inviter.to_string(),
                Arc::new(Message::GameResponse {
                    peer: responder.to_string(),
                    accept,
                }),
            ));

            if accept {
                let key = game_key(inviter, responder);
                let session = GameSession::new(inviter, responder);
                let board = session.board_message();
                table.playing.insert(inviter.to_string(), key.clone());
                table.playing.insert(responder.to_string(), key.clone());
                table.games.insert(key, session);

                deliveries.push((inviter.to_string(), Arc::clone(&board)));
                deliveries.push((responder.to_string(), board));
                global_metrics().game_started();
                info!(inviter, invitee = responder, "Game started");
            } else {
                debug!(inviter, responder, "Game invite declined");
            }
        }

        self.deliver(deliveries);
        Ok(())
    }

    /// `player` marks `position`.
    ///
    /// Errors are checked in order: no game, wrong turn, position out of
    /// range, occupied cell. A rejected move leaves the board untouched.
    pub fn make_move(&self, player: &str, position: u32) -> Result<()> {
        let deliveries = {
            let mut table = self.lock()?;
            let key = table
                .playing
                .get(player)
                .cloned()
                .ok_or(ProtocolError::NoActiveGame)?;
            let session = table
                .games
                .get_mut(&key)
                .ok_or(ProtocolError::NoActiveGame)?;

            if session.turn != player {
                return Err(ProtocolError::NotYourTurn);
            }
            let cell = position as usize;
            if cell >= BOARD_CELLS {
                return Err(ProtocolError::InvalidPosition(position));
            }
            let mark = session.mark_of(player);
            if !session.board.place(cell, mark) {
                return Err(ProtocolError::PositionOccupied(position));
            }

            let opponent = session.opponent_of(player).to_string();
            if session.board.has_line(mark) {
                table.remove_game(&key);
                info!(winner = player, loser = %opponent, "Game won");
                vec![
                    (player.to_string(), Arc::new(Message::GameOver(GameResult::Win))),
                    (opponent, Arc::new(Message::GameOver(GameResult::Loss))),
                ]
            } else if session.board.is_full() {
                table.remove_game(&key);
                info!(player, opponent = %opponent, "Game drawn");
                let draw = Arc::new(Message::GameOver(GameResult::Draw));
                vec![(player.to_string(), Arc::clone(&draw)), (opponent, draw)]
            } else {
                session.turn = opponent.clone();
                let board = session.board_message();
                debug!(player, position, next = %opponent, "Move accepted");
                vec![(player.to_string(), Arc::clone(&board)), (opponent, board)]
            }
        };

        self.deliver(deliveries);
        Ok(())
    }

    /// Tear down everything referencing `identity`.
    ///
    /// A game in progress is aborted and the opponent, if still registered,
    /// receives an opponent-disconnected result.
    pub fn on_disconnect(&self, identity: &str) -> Result<()> {
        let opponent = {
            let mut table = self.lock()?;
            table
                .invites
                .retain(|(inviter, invitee)| inviter != identity && invitee != identity);

            match table.playing.get(identity).cloned() {
                Some(key) => table
                    .remove_game(&key)
                    .map(|session| session.opponent_of(identity).to_string()),
                None => None,
            }
        };

        if let Some(opponent) = opponent {
            warn!(identity, opponent = %opponent, "Game aborted by disconnect");
            if self.registry.contains(&opponent)? {
                self.deliver(vec![(
                    opponent,
                    Arc::new(Message::GameOver(GameResult::OpponentDisconnected)),
                )]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::registry::PeerHandle;
    use tokio::sync::mpsc::Receiver;

    struct Harness {
        games: GameCoordinator,
        registry: Arc<Registry>,
        alice: Receiver<Arc<Message>>,
        bob: Receiver<Arc<Message>>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(Registry::new());
        let (a, alice) = PeerHandle::channel(64);
        let (b, bob) = PeerHandle::channel(64);
        registry.register("alice", a).unwrap();
        registry.register("bob", b).unwrap();
        Harness {
            games: GameCoordinator::new(Arc::clone(&registry)),
            registry,
            alice,
            bob,
        }
    }

    fn drain(rx: &mut Receiver<Arc<Message>>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push((*msg).clone());
        }
        out
    }

    fn started() -> Harness {
        let mut h = harness();
        h.games.invite("alice", "bob").unwrap();
        h.games.respond("bob", "alice", true).unwrap();
        drain(&mut h.alice);
        drain(&mut h.bob);
        h
    }

    /// Alternate moves: alice plays `xs`, bob plays `os`.
    fn play(h: &Harness, xs: &[u32], os: &[u32]) {
        for i in 0..xs.len() {
            h.games.make_move("alice", xs[i]).unwrap();
            if let Some(o) = os.get(i) {
                h.games.make_move("bob", *o).unwrap();
            }
        }
    }

    #[test]
    fn test_accepted_invite_sends_empty_board_with_inviter_to_move() {
        let mut h = harness();
        h.games.invite("alice", "bob").unwrap();
        assert_eq!(
            drain(&mut h.bob),
            vec![Message::GameInvite {
                peer: "alice".into()
            }]
        );

        h.games.respond("bob", "alice", true).unwrap();
        let board = Message::Board {
            board: Board::new(),
            turn: "alice".into(),
        };
        assert_eq!(
            drain(&mut h.alice),
            vec![
                Message::GameResponse {
                    peer: "bob".into(),
                    accept: true
                },
                board.clone()
            ]
        );
        assert_eq!(drain(&mut h.bob), vec![board]);
        assert_eq!(h.games.active_games().unwrap(), 1);
    }

    #[test]
    fn test_move_flips_turn_and_updates_both() {
        let mut h = started();
        h.games.make_move("alice", 4).unwrap();

        let session = h.games.session_of("bob").unwrap().unwrap();
        assert_eq!(session.board().get(4), Some(Mark::A));
        assert_eq!(session.turn(), "bob");

        let alice = drain(&mut h.alice);
        assert_eq!(alice, drain(&mut h.bob));
        assert!(matches!(&alice[..], [Message::Board { turn, .. }] if turn == "bob"));
    }

    #[test]
    fn test_out_of_turn_move_leaves_board_untouched() {
        let mut h = started();
        assert!(matches!(
            h.games.make_move("bob", 0),
            Err(ProtocolError::NotYourTurn)
        ));
        let session = h.games.session_of("alice").unwrap().unwrap();
        assert_eq!(*session.board(), Board::new());
        assert_eq!(session.turn(), "alice");
        assert!(drain(&mut h.alice).is_empty());
        assert!(drain(&mut h.bob).is_empty());
    }

    #[test]
    fn test_move_errors_in_order() {
        let h = started();
        assert!(matches!(
            h.games.make_move("carol", 0),
            Err(ProtocolError::NoActiveGame)
        ));
        assert!(matches!(
            h.games.make_move("alice", 9),
            Err(ProtocolError::InvalidPosition(9))
        ));
        h.games.make_move("alice", 0).unwrap();
        assert!(matches!(
            h.games.make_move("bob", 0),
            Err(ProtocolError::PositionOccupied(0))
        ));
        // Still bob's turn after the rejected move
        h.games.make_move("bob", 1).unwrap();
    }

    #[test]
    fn test_every_line_wins_for_inviter() {
        for line in Board::LINES {
            let mut h = started();
            let xs: Vec<u32> = line.iter().map(|&i| i as u32).collect();
            // Two marks never make a line, so bob's picks are free
            let os: Vec<u32> = (0..9u32).filter(|c| !xs.contains(c)).take(2).collect();
            play(&h, &xs, &os);

            assert_eq!(
                drain(&mut h.alice).last(),
                Some(&Message::GameOver(GameResult::Win)),
                "line {line:?}"
            );
            assert_eq!(
                drain(&mut h.bob).last(),
                Some(&Message::GameOver(GameResult::Loss))
            );
            assert_eq!(h.games.active_games().unwrap(), 0);
            assert!(matches!(
                h.games.make_move("alice", 8),
                Err(ProtocolError::NoActiveGame)
            ));
            assert!(matches!(
                h.games.make_move("bob", 8),
                Err(ProtocolError::NoActiveGame)
            ));
        }
    }

    #[test]
    fn test_invitee_can_win() {
        let mut h = started();
        // X: 0 1 8, O: 3 4 5
        play(&h, &[0, 1], &[3, 4]);
        h.games.make_move("alice", 8).unwrap();
        h.games.make_move("bob", 5).unwrap();
        assert_eq!(
            drain(&mut h.bob).last(),
            Some(&Message::GameOver(GameResult::Win))
        );
        assert_eq!(
            drain(&mut h.alice).last(),
            Some(&Message::GameOver(GameResult::Loss))
        );
    }

    #[test]
    fn test_full_board_without_line_is_draw() {
        let mut h = started();
        // X O X
        // X O O
        // O X X
        play(&h, &[0, 2, 3, 7, 8], &[1, 4, 5, 6]);
        let draw = Message::GameOver(GameResult::Draw);
        assert_eq!(drain(&mut h.alice).last(), Some(&draw));
        assert_eq!(drain(&mut h.bob).last(), Some(&draw));
        assert_eq!(h.games.active_games().unwrap(), 0);
    }

    #[test]
    fn test_disconnect_notifies_registered_opponent() {
        let mut h = started();
        h.registry.unregister("alice").unwrap();
        h.games.on_disconnect("alice").unwrap();
        assert_eq!(
            drain(&mut h.bob),
            vec![Message::GameOver(GameResult::OpponentDisconnected)]
        );
        assert!(h.games.session_of("bob").unwrap().is_none());
    }

    #[test]
    fn test_response_requires_pending_invite() {
        let h = harness();
        assert!(matches!(
            h.games.respond("bob", "alice", true),
            Err(ProtocolError::NoPendingInvite(name)) if name == "alice"
        ));

        h.games.invite("alice", "bob").unwrap();
        h.games.respond("bob", "alice", false).unwrap();
        assert_eq!(h.games.active_games().unwrap(), 0);
        // A decline consumes the invite
        assert!(h.games.respond("bob", "alice", true).is_err());
    }

    #[test]
    fn test_one_game_per_player() {
        let h = started();
        let (c, _carol) = PeerHandle::channel(8);
        h.registry.register("carol", c).unwrap();
        h.games.invite("carol", "alice").unwrap();
        assert!(matches!(
            h.games.respond("alice", "carol", true),
            Err(ProtocolError::GameInProgress)
        ));
    }

    #[test]
    fn test_invite_to_unknown_user() {
        let h = harness();
        assert!(matches!(
            h.games.invite("alice", "nobody"),
            Err(ProtocolError::UserNotFound(name)) if name == "nobody"
        ));
        assert!(!h.games.has_pending_invite("alice", "nobody").unwrap());
    }

    #[test]
    fn test_invite_racing_disconnect_leaves_no_stale_entry() {
        let h = harness();
        let (games, registry) = (&h.games, &h.registry);

        std::thread::scope(|s| {
            s.spawn(move || {
                for _ in 0..500 {
                    let _ = games.invite("alice", "bob");
                }
            });
            s.spawn(move || {
                for _ in 0..500 {
                    registry.unregister("bob").unwrap();
                    games.on_disconnect("bob").unwrap();
                    let (b, _rx) = PeerHandle::channel(4);
                    registry.register("bob", b).unwrap();
                }
                registry.unregister("bob").unwrap();
                games.on_disconnect("bob").unwrap();
            });
        });

        assert!(!h.registry.contains("bob").unwrap());
        assert!(!h.games.has_pending_invite("alice", "bob").unwrap());
    }
}
