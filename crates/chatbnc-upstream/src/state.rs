//! Chat-state tracker: what a freshly attached client needs to know.
//!
//! The chat service only tells a character about the world once, right
//! after it identifies: server variables, friends, the full online list,
//! every joined channel. A client attaching to the bouncer later missed
//! all of that, so [`ChatState`] keeps a running copy, updated from every
//! upstream command, and can replay it as a [`snapshot`](ChatState::snapshot).
//!
//! Nothing here interprets commands beyond bookkeeping. Anything the
//! tracker doesn't recognise is simply not tracked.

use std::time::Duration;

use chatbnc_protocol::{
    ChannelMode, CharacterRef, IgnoreUpdate, ListEntry, OpenRoom,
    PublicChannel, ServerCommand, Status,
};
use tokio::time::Instant;

use crate::Directory;

/// Entries per `LIS` frame in a snapshot.
pub const LIS_CHUNK: usize = 100;

/// Gender reported for our own character before the service told us.
const UNKNOWN_GENDER: &str = "None";

// ---------------------------------------------------------------------------
// Tracked records
// ---------------------------------------------------------------------------

/// One online character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Character {
    pub gender: String,
    pub status: Status,
    pub statusmsg: String,
}

/// A channel our character is in.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub title: String,
    pub mode: ChannelMode,
    /// Empty when unknown.
    pub owner: String,
    pub ops: Vec<String>,
    pub members: Directory<()>,
    pub description: String,
}

/// A channel listing with the time it was received.
#[derive(Debug, Clone)]
struct Cached<T> {
    entries: Vec<T>,
    fetched_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn fresh(&self, max_age: Duration) -> Option<Vec<T>> {
        (self.fetched_at.elapsed() <= max_age).then(|| self.entries.clone())
    }
}

// ---------------------------------------------------------------------------
// ChatState
// ---------------------------------------------------------------------------

/// Running copy of one character's view of the chat.
#[derive(Debug)]
pub struct ChatState {
    identity: String,
    variables: Directory<serde_json::Value>,
    friends: Vec<String>,
    bookmarks: Vec<String>,
    ignores: Vec<String>,
    global_ops: Vec<String>,
    characters: Directory<Character>,
    channels: Directory<Channel>,
    public_channels: Option<Cached<PublicChannel>>,
    open_rooms: Option<Cached<OpenRoom>>,
}

impl ChatState {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            variables: Directory::new(),
            friends: Vec::new(),
            bookmarks: Vec::new(),
            ignores: Vec::new(),
            global_ops: Vec::new(),
            characters: Directory::new(),
            channels: Directory::new(),
            public_channels: None,
            open_rooms: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Forgets everything learned from the service. Used when the
    /// upstream link drops: the next login resends it all.
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.identity));
    }

    /// Bookmarks come from the login ticket, not from a chat command.
    pub fn set_bookmarks(&mut self, bookmarks: Vec<String>) {
        self.bookmarks = bookmarks;
    }

    /// Our own status and status message. Defaults to online with an
    /// empty message if the service hasn't reported us yet.
    pub fn own_status(&self) -> (Status, String) {
        self.characters
            .get(&self.identity)
            .map(|c| (c.status, c.statusmsg.clone()))
            .unwrap_or_default()
    }

    pub fn character(&self, name: &str) -> Option<&Character> {
        self.characters.get(name)
    }

    pub fn online_count(&self) -> usize {
        self.characters.len()
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.get(id)
    }

    /// Display title of a joined channel, falling back to its id.
    pub fn channel_title<'a>(&'a self, id: &'a str) -> &'a str {
        match self.channels.get(id) {
            Some(ch) if !ch.title.is_empty() => &ch.title,
            _ => id,
        }
    }

    /// The official channel list, if received within `max_age`.
    pub fn fresh_public_channels(&self, max_age: Duration) -> Option<ServerCommand> {
        let channels = self.public_channels.as_ref()?.fresh(max_age)?;
        Some(ServerCommand::Cha { channels })
    }

    /// The open room list, if received within `max_age`.
    pub fn fresh_open_rooms(&self, max_age: Duration) -> Option<ServerCommand> {
        let channels = self.open_rooms.as_ref()?.fresh(max_age)?;
        Some(ServerCommand::Ors { channels })
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Applies one upstream command.
    pub fn apply(&mut self, cmd: &ServerCommand) {
        match cmd {
            ServerCommand::Var { variable, value } => {
                self.variables.insert(variable.as_str(), value.clone());
            }
            ServerCommand::Frl { characters } => {
                self.friends = characters.clone();
            }
            ServerCommand::Ign(update) => self.apply_ignore(update),
            ServerCommand::Adl { ops } => self.global_ops = ops.clone(),
            ServerCommand::Aop { character } => {
                push_unique(&mut self.global_ops, character);
            }
            ServerCommand::Dop { character } => {
                self.global_ops.retain(|c| c != character);
            }

            ServerCommand::Lis { characters } => {
                for ListEntry(name, gender, status, statusmsg) in characters {
                    self.characters.insert(
                        name.as_str(),
                        Character {
                            gender: gender.clone(),
                            status: *status,
                            statusmsg: statusmsg.clone(),
                        },
                    );
                }
            }
            ServerCommand::Nln {
                identity,
                gender,
                status,
            } => {
                self.characters.insert(
                    identity.as_str(),
                    Character {
                        gender: gender.clone(),
                        status: *status,
                        statusmsg: String::new(),
                    },
                );
            }
            ServerCommand::Fln { character } => {
                self.characters.remove(character);
                for ch in self.channels.values_mut() {
                    ch.members.remove(character);
                }
            }
            ServerCommand::Sta {
                character,
                status,
                statusmsg,
            } => {
                if let Some(c) = self.characters.get_mut(character) {
                    c.status = *status;
                    c.statusmsg = statusmsg.clone();
                }
            }

            ServerCommand::Cha { channels } => {
                self.public_channels = Some(Cached {
                    entries: channels.clone(),
                    fetched_at: Instant::now(),
                });
            }
            ServerCommand::Ors { channels } => {
                self.open_rooms = Some(Cached {
                    entries: channels.clone(),
                    fetched_at: Instant::now(),
                });
            }

            ServerCommand::Jch {
                character,
                channel,
                title,
            } => {
                if character.identity == self.identity {
                    self.channels.insert(
                        channel.as_str(),
                        Channel {
                            title: title.clone(),
                            ..Channel::default()
                        },
                    );
                }
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.members.insert(character.identity.as_str(), ());
                }
            }
            ServerCommand::Lch { channel, character }
            | ServerCommand::Cku {
                channel, character, ..
            }
            | ServerCommand::Cbu {
                channel, character, ..
            } => self.leave_channel(channel, character),
            ServerCommand::Ich {
                users,
                channel,
                mode,
            } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.mode = *mode;
                    ch.members.clear();
                    for user in users {
                        ch.members.insert(user.identity.as_str(), ());
                    }
                }
            }
            ServerCommand::Col { channel, oplist } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    let mut ops = oplist.iter().cloned();
                    ch.owner = ops.next().unwrap_or_default();
                    ch.ops = ops.filter(|o| !o.is_empty()).collect();
                }
            }
            ServerCommand::Cds {
                channel,
                description,
            } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.description = description.clone();
                }
            }
            ServerCommand::Rmo { mode, channel } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.mode = *mode;
                }
            }
            ServerCommand::Coa { character, channel } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    push_unique(&mut ch.ops, character);
                }
            }
            ServerCommand::Cor { character, channel } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.ops.retain(|o| o != character);
                }
            }
            ServerCommand::Cso { character, channel } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.owner = character.clone();
                }
            }

            ServerCommand::Idn { .. }
            | ServerCommand::Err { .. }
            | ServerCommand::Pin
            | ServerCommand::Hlo { .. }
            | ServerCommand::Con { .. }
            | ServerCommand::Msg { .. }
            | ServerCommand::Lrp { .. }
            | ServerCommand::Pri { .. }
            | ServerCommand::Rll { .. } => {}
        }
    }

    fn apply_ignore(&mut self, update: &IgnoreUpdate) {
        match update {
            IgnoreUpdate::Init { characters } | IgnoreUpdate::List { characters } => {
                self.ignores = characters.clone();
            }
            IgnoreUpdate::Add { character } => push_unique(&mut self.ignores, character),
            IgnoreUpdate::Delete { character } => {
                self.ignores.retain(|c| c != character);
            }
            IgnoreUpdate::Notify { .. } => {}
        }
    }

    fn leave_channel(&mut self, channel: &str, character: &str) {
        if character == self.identity {
            self.channels.remove(channel);
        } else if let Some(ch) = self.channels.get_mut(channel) {
            ch.members.remove(character);
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /// Builds the setup sequence for a newly attached client.
    ///
    /// Order: `VAR`s, `HLO`, `CON`, `FRL`, `IGN init`, `ADL`, `LIS` pages,
    /// our own `NLN` and `STA`, then `JCH`/`COL`/`ICH`/`CDS` per joined
    /// channel in join order.
    pub fn snapshot(&self, welcome: &str) -> Vec<ServerCommand> {
        let mut out = Vec::new();

        for (variable, value) in self.variables.iter() {
            out.push(ServerCommand::Var {
                variable: variable.to_owned(),
                value: value.clone(),
            });
        }
        out.push(ServerCommand::Hlo {
            message: welcome.to_owned(),
        });
        out.push(ServerCommand::Con {
            count: self.online_count(),
        });
        out.push(ServerCommand::Frl {
            characters: self
                .friends
                .iter()
                .chain(&self.bookmarks)
                .cloned()
                .collect(),
        });
        out.push(ServerCommand::Ign(IgnoreUpdate::Init {
            characters: self.ignores.clone(),
        }));
        out.push(ServerCommand::Adl {
            ops: self.global_ops.clone(),
        });

        let entries: Vec<ListEntry> = self
            .characters
            .iter()
            .map(|(name, c)| {
                ListEntry(name.to_owned(), c.gender.clone(), c.status, c.statusmsg.clone())
            })
            .collect();
        for chunk in entries.chunks(LIS_CHUNK) {
            out.push(ServerCommand::Lis {
                characters: chunk.to_vec(),
            });
        }

        let own = self.characters.get(&self.identity);
        out.push(ServerCommand::Nln {
            identity: self.identity.clone(),
            gender: own.map_or_else(|| UNKNOWN_GENDER.to_owned(), |c| c.gender.clone()),
            status: Status::Online,
        });
        let (status, statusmsg) = self.own_status();
        out.push(ServerCommand::Sta {
            character: self.identity.clone(),
            status,
            statusmsg,
        });

        for (id, ch) in self.channels.iter() {
            out.push(ServerCommand::Jch {
                character: CharacterRef::new(self.identity.as_str()),
                channel: id.to_owned(),
                title: ch.title.clone(),
            });
            out.push(ServerCommand::Col {
                channel: id.to_owned(),
                oplist: std::iter::once(ch.owner.clone())
                    .chain(ch.ops.iter().cloned())
                    .collect(),
            });
            out.push(ServerCommand::Ich {
                users: ch.members.iter().map(|(m, _)| CharacterRef::new(m)).collect(),
                channel: id.to_owned(),
                mode: ch.mode,
            });
            out.push(ServerCommand::Cds {
                channel: id.to_owned(),
                description: ch.description.clone(),
            });
        }

        out
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_owned());
    }
}

// =========================================================================
// Tests
// =========================================================================
