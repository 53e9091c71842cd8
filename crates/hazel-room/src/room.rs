//! The replicated room: owners, components and message dispatch.
//!
//! A [`Room`] is a plain state machine. It never touches the network:
//! inbound payloads are fed to [`Room::handle_payload`], and everything
//! the room wants to say is collected until [`Room::flush`] hands it out
//! as payloads for the client to send.
//!
//! ```text
//!   Payload::GameData ──▶ handle_game_data ──▶ objects / netobjects
//!                                   │
//!                                   └──▶ RoomEvent (event bus)
//!
//!   set_name / spawn_prefab / … ──▶ stream ─┐
//!   dirty components ──────────────────────┼──▶ flush() ──▶ Vec<Payload>
//!   StartGame / RemovePlayer / … ──▶ pending┘
//! ```
//!
//! Two tables hold the world. `objects` maps an owner id to its
//! fixed-slot component array; `netobjects` maps a netid to the
//! component itself. Every netid lives in exactly one slot and every
//! occupied slot names a live netid; [`Room::check_integrity`] verifies
//! that.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use hazel_protocol::{
    BufferReader, DisconnectReason, GameCode, GameDataMessage, GameOptions, JoinGame, Payload,
    PlayerInfo, RemovePlayer, Rpc, SpawnComponent, SpawnMessage, SpawnType, SystemType, Vector2,
    COLOR_COUNT, NO_PLAYER, SPAWN_FLAG_CLIENT_CHARACTER,
};
use tokio::sync::{mpsc, Notify};

use crate::components::{
    prefab_components, Component, ComponentData, ComponentKind, GameData, MeetingHud,
    Networkable, ShipStatus, VoteState,
};
use crate::config::{RoomConfig, RoomState};
use crate::error::RoomError;
use crate::events::RoomEvent;
use crate::owner::{Owner, OwnerKind, GLOBAL_OWNER};

/// Players are identified by a single byte on the wire; ids 0–9 are
/// handed out by the host.
const MAX_PLAYER_ID: u8 = 10;

/// Votes needed to kick a player.
const VOTE_KICK_THRESHOLD: usize = 3;

/// Dirty bit for single-field components.
const WHOLE: u32 = 1;

pub struct Room {
    config: RoomConfig,
    state: RoomState,
    code: GameCode,
    client_id: i32,
    host_id: i32,
    is_public: bool,
    settings: GameOptions,

    objects: BTreeMap<i32, Owner>,
    netobjects: HashMap<u32, Component>,
    next_netid: u32,

    /// GameData messages broadcast on the next flush.
    stream: Vec<GameDataMessage>,
    /// GameDataTo batches, one per recipient.
    directed: Vec<(i32, Vec<GameDataMessage>)>,
    /// Root payloads other than game data.
    pending: Vec<Payload>,

    sent_ready: bool,
    counter_sequence: u32,
    events: mpsc::UnboundedSender<RoomEvent>,
    ready: Arc<Notify>,
}

impl Room {
    /// Creates an empty room and the receiving end of its event bus.
    pub fn new(config: RoomConfig) -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let mut objects = BTreeMap::new();
        objects.insert(GLOBAL_OWNER, Owner::global());
        let room = Self {
            config,
            state: RoomState::Connecting,
            code: GameCode(0),
            client_id: 0,
            host_id: 0,
            is_public: false,
            settings: GameOptions::default(),
            objects,
            netobjects: HashMap::new(),
            next_netid: 1,
            stream: Vec::new(),
            directed: Vec::new(),
            pending: Vec::new(),
            sent_ready: false,
            counter_sequence: 0,
            events,
            ready: Arc::new(Notify::new()),
        };
        (room, rx)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn code(&self) -> GameCode {
        self.code
    }

    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    pub fn host_id(&self) -> i32 {
        self.host_id
    }

    pub fn am_host(&self) -> bool {
        self.state.in_game() && self.client_id == self.host_id
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn settings(&self) -> &GameOptions {
        &self.settings
    }

    pub fn owner(&self, id: i32) -> Option<&Owner> {
        self.objects.get(&id)
    }

    /// Client ids of every player in the room.
    pub fn players(&self) -> Vec<i32> {
        self.objects
            .values()
            .filter(|o| o.kind() == OwnerKind::Player)
            .map(Owner::id)
            .collect()
    }

    pub fn component(&self, netid: u32) -> Option<&Component> {
        self.netobjects.get(&netid)
    }

    pub fn component_count(&self) -> usize {
        self.netobjects.len()
    }

    /// Netid of an owner's component of `kind`.
    pub fn netid_of(&self, owner_id: i32, kind: ComponentKind) -> Option<u32> {
        self.objects.get(&owner_id)?.slot(kind.slot())
    }

    pub fn player_id_of(&self, client_id: i32) -> Option<u8> {
        let netid = self.netid_of(client_id, ComponentKind::PlayerControl)?;
        match &self.netobjects.get(&netid)?.data {
            ComponentData::PlayerControl(pc) => Some(pc.player_id),
            _ => None,
        }
    }

    pub fn client_of_player(&self, player_id: u8) -> Option<i32> {
        self.players()
            .into_iter()
            .find(|client| self.player_id_of(*client) == Some(player_id))
    }

    pub fn game_data(&self) -> Option<&GameData> {
        let netid = self.netid_of(GLOBAL_OWNER, ComponentKind::GameData)?;
        match &self.netobjects.get(&netid)?.data {
            ComponentData::GameData(table) => Some(table),
            _ => None,
        }
    }

    pub fn player_info(&self, client_id: i32) -> Option<&PlayerInfo> {
        self.game_data()?.player(self.player_id_of(client_id)?)
    }

    pub fn ship(&self) -> Option<&ShipStatus> {
        let netid = self.netid_of(GLOBAL_OWNER, ComponentKind::ShipStatus)?;
        match &self.netobjects.get(&netid)?.data {
            ComponentData::ShipStatus(ship) => Some(ship),
            _ => None,
        }
    }

    pub fn meeting(&self) -> Option<&MeetingHud> {
        let netid = self.netid_of(GLOBAL_OWNER, ComponentKind::MeetingHud)?;
        match &self.netobjects.get(&netid)?.data {
            ComponentData::MeetingHud(hud) => Some(hud),
            _ => None,
        }
    }

    /// Woken whenever a player reports Ready or leaves.
    pub fn ready_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.ready)
    }

    fn emit(&self, event: RoomEvent) {
        // A dropped receiver only means nobody listens.
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Moves to `target` if the state machine allows it.
    pub fn set_state(&mut self, target: RoomState) -> bool {
        if self.state == target {
            return true;
        }
        if !self.state.can_transition_to(target) {
            tracing::warn!(from = %self.state, to = %target, "illegal room state transition ignored");
            return false;
        }
        tracing::debug!(from = %self.state, to = %target, "room state");
        self.state = target;
        true
    }

    /// Starts replication for a freshly joined game.
    pub fn reset(&mut self, code: GameCode, client_id: i32, host_id: i32) {
        self.objects.clear();
        self.objects.insert(GLOBAL_OWNER, Owner::global());
        self.netobjects.clear();
        self.next_netid = 1;
        self.stream.clear();
        self.directed.clear();
        self.pending.clear();
        self.sent_ready = false;
        self.counter_sequence = 0;

        self.code = code;
        self.client_id = client_id;
        self.host_id = host_id;
        tracing::info!(code = %code, client_id, host_id, "joined game");
        self.state = RoomState::Joined;
        self.handle_join(client_id);
        self.emit(RoomEvent::HostChanged { host_id });
    }

    /// Leaves the current game without touching the session.
    pub fn clear(&mut self) {
        self.objects.retain(|id, _| *id == GLOBAL_OWNER);
        self.objects.insert(GLOBAL_OWNER, Owner::global());
        self.netobjects.clear();
        self.stream.clear();
        self.directed.clear();
        self.pending.clear();
        self.set_state(RoomState::Identified);
    }

    /// Registers a player. Re-joining a known id is a no-op.
    pub fn handle_join(&mut self, client_id: i32) -> bool {
        if client_id == GLOBAL_OWNER || self.objects.contains_key(&client_id) {
            return false;
        }
        self.objects.insert(client_id, Owner::player(client_id));
        tracing::debug!(client_id, "player joined");
        self.emit(RoomEvent::PlayerJoined { client_id });
        true
    }

    /// Removes a player, its game-table and vote-kick entries, and every
    /// component it owns.
    pub fn handle_leave(&mut self, client_id: i32) -> bool {
        if client_id == GLOBAL_OWNER {
            return false;
        }
        let Some(owner) = self.objects.get(&client_id) else {
            return false;
        };
        let owned: Vec<u32> = owner.components().map(|(_, netid)| netid).collect();

        if let Some(player_id) = self.player_id_of(client_id) {
            if let Some(ComponentData::GameData(table)) = self.global_data_mut(ComponentKind::GameData) {
                table.remove(player_id);
            }
        }
        if let Some(ComponentData::VoteBanSystem(votes)) =
            self.global_data_mut(ComponentKind::VoteBanSystem)
        {
            votes.remove_client(client_id);
        }
        for netid in owned {
            self.remove_component(netid);
        }
        self.objects.remove(&client_id);

        tracing::debug!(client_id, "player left");
        self.emit(RoomEvent::PlayerLeft { client_id });
        self.ready.notify_waiters();
        true
    }

    pub fn set_host(&mut self, host_id: i32) {
        if self.host_id != host_id {
            tracing::info!(old = self.host_id, new = host_id, "host changed");
            self.host_id = host_id;
            self.emit(RoomEvent::HostChanged { host_id });
        }
    }

    /// Publishes a session loss to room listeners.
    /// Anything still queued for the old connection is dropped.
    pub fn notify_disconnected(&mut self, reason: Option<DisconnectReason>, message: Option<String>) {
        self.set_state(RoomState::Connecting);
        self.stream.clear();
        self.directed.clear();
        self.pending.clear();
        self.emit(RoomEvent::Disconnected { reason, message });
        self.ready.notify_waiters();
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Applies one root payload. Payloads for other games are ignored.
    pub fn handle_payload(&mut self, payload: &Payload) {
        match payload {
            Payload::JoinedGame {
                code,
                client_id,
                host_id,
                others,
            } => {
                self.reset(*code, *client_id, *host_id);
                for other in others {
                    self.handle_join(*other);
                }
            }
            Payload::JoinGame(JoinGame::Joined {
                code,
                client_id,
                host_id,
            }) if self.is_current(*code) => {
                self.handle_join(*client_id);
                self.set_host(*host_id);
            }
            Payload::RemovePlayer(RemovePlayer::Removed {
                code,
                client_id,
                host_id,
                reason,
            }) if self.is_current(*code) => {
                tracing::debug!(client_id, %reason, "player removed");
                self.handle_leave(*client_id);
                self.set_host(*host_id);
            }
            Payload::StartGame { code } if self.is_current(*code) => self.handle_start(),
            Payload::EndGame { code, reason, .. } if self.is_current(*code) => {
                self.set_state(RoomState::Ended);
                self.sent_ready = false;
                for owner in self.objects.values_mut() {
                    owner.ready = false;
                }
                self.emit(RoomEvent::GameEnded { reason: *reason });
            }
            Payload::AlterGame { code, is_public } if self.is_current(*code) => {
                self.is_public = *is_public;
                self.emit(RoomEvent::PrivacyChanged { is_public: *is_public });
            }
            Payload::GameData { code, messages } if self.is_current(*code) => {
                for message in messages {
                    self.handle_game_data(message);
                }
            }
            Payload::GameDataTo {
                code,
                recipient,
                messages,
            } if self.is_current(*code) && *recipient == self.client_id => {
                for message in messages {
                    self.handle_game_data(message);
                }
            }
            Payload::WaitForHost { client_id, .. } => {
                tracing::info!(client_id, "waiting for host to rejoin");
            }
            _ => {}
        }
    }

    fn is_current(&self, code: GameCode) -> bool {
        (self.state.in_game() || self.state == RoomState::Ended) && code == self.code
    }

    fn handle_start(&mut self) {
        self.set_state(RoomState::Started);
        self.emit(RoomEvent::GameStarted);
        if !self.sent_ready {
            self.sent_ready = true;
            self.stream.push(GameDataMessage::Ready {
                client_id: self.client_id,
            });
            self.mark_ready(self.client_id);
        }
    }

    /// Applies one game-data message. Nothing here fails: malformed or
    /// stale messages are logged and dropped.
    pub fn handle_game_data(&mut self, message: &GameDataMessage) {
        match message {
            GameDataMessage::Data { netid, data } => self.apply_data(*netid, data),
            GameDataMessage::Rpc { netid, rpc } => self.handle_rpc(*netid, rpc),
            GameDataMessage::Spawn(spawn) => self.handle_spawn(spawn),
            GameDataMessage::Despawn { netid } => {
                self.remove_component(*netid);
            }
            GameDataMessage::SceneChange { client_id, scene } => {
                self.handle_scene_change(*client_id, scene)
            }
            GameDataMessage::Ready { client_id } => self.mark_ready(*client_id),
            GameDataMessage::Unknown { tag, .. } => {
                tracing::debug!(tag, "unknown game data message ignored");
            }
        }
    }

    fn apply_data(&mut self, netid: u32, data: &Bytes) {
        let Some(component) = self.netobjects.get_mut(&netid) else {
            tracing::trace!(netid, "data for unknown netid");
            return;
        };
        if let Err(e) = component.data.read_delta(&mut BufferReader::new(data)) {
            tracing::warn!(netid, error = %e, "malformed component delta");
            return;
        }
        if let ComponentData::CustomNetworkTransform(cnt) = &component.data {
            let event = RoomEvent::Moved {
                client_id: component.owner_id,
                position: cnt.position,
            };
            self.emit(event);
        }
    }

    fn handle_spawn(&mut self, spawn: &SpawnMessage) {
        let Some(spawn_type) = SpawnType::from_u32(spawn.spawn_type) else {
            tracing::debug!(spawn_type = spawn.spawn_type, "unknown prefab ignored");
            return;
        };
        if !self.accepts_owner(spawn_type, spawn.owner_id) {
            tracing::warn!(?spawn_type, owner_id = spawn.owner_id, "spawn for wrong owner kind");
            return;
        }
        if spawn.owner_id != GLOBAL_OWNER {
            self.handle_join(spawn.owner_id);
        }

        for (kind, entry) in prefab_components(spawn_type).iter().zip(&spawn.components) {
            if self.netobjects.contains_key(&entry.netid) {
                tracing::debug!(netid = entry.netid, "duplicate spawn ignored");
                continue;
            }
            let mut data = ComponentData::new(*kind, spawn_type);
            if let ComponentData::MeetingHud(hud) = &mut data {
                hud.players = self.area_players();
            }
            if let Err(e) = data.read_full(&mut BufferReader::new(&entry.data)) {
                tracing::warn!(netid = entry.netid, ?kind, error = %e, "malformed spawn state");
                continue;
            }
            self.next_netid = self.next_netid.max(entry.netid.wrapping_add(1));
            self.insert_component(Component::new(entry.netid, spawn.owner_id, spawn_type, data));
        }
        if spawn.components.len() > prefab_components(spawn_type).len() {
            tracing::debug!(?spawn_type, "extra spawn components ignored");
        }
    }

    fn handle_scene_change(&mut self, client_id: i32, scene: &str) {
        if scene != self.config.in_scene_sentinel {
            tracing::debug!(client_id, scene, "scene change ignored");
            return;
        }
        self.handle_join(client_id);
        if let Some(owner) = self.objects.get_mut(&client_id) {
            owner.in_scene = true;
        }
        self.emit(RoomEvent::InScene { client_id });

        if !self.am_host() {
            return;
        }
        match self.snapshot() {
            Ok(messages) if !messages.is_empty() => self.directed.push((client_id, messages)),
            Ok(_) => {}
            Err(e) => tracing::warn!(client_id, error = %e, "failed to serialise room snapshot"),
        }
        match self.spawn_prefab(SpawnType::Player, client_id) {
            Ok(netids) => {
                if let Some(control) = netids.first() {
                    let rpc = Rpc::SyncSettings {
                        options: self.settings.clone(),
                    };
                    self.push_rpc(*control, rpc);
                }
            }
            Err(e) => tracing::warn!(client_id, error = %e, "could not spawn player"),
        }
    }

    fn mark_ready(&mut self, client_id: i32) {
        if let Some(owner) = self.objects.get_mut(&client_id) {
            owner.ready = true;
        }
        self.emit(RoomEvent::Ready { client_id });
        self.ready.notify_waiters();
    }

    // -----------------------------------------------------------------------
    // RPC dispatch
    // -----------------------------------------------------------------------

    fn handle_rpc(&mut self, netid: u32, rpc: &Rpc) {
        let Some(component) = self.netobjects.get(&netid) else {
            tracing::trace!(netid, rpc = rpc.id(), "rpc for unknown netid");
            return;
        };
        let owner_id = component.owner_id;
        match component.kind() {
            ComponentKind::PlayerControl => self.player_control_rpc(netid, owner_id, rpc),
            ComponentKind::PlayerPhysics => self.player_physics_rpc(owner_id, rpc),
            ComponentKind::CustomNetworkTransform => self.transform_rpc(netid, owner_id, rpc),
            ComponentKind::GameData => self.game_data_rpc(rpc),
            ComponentKind::VoteBanSystem => self.vote_ban_rpc(rpc),
            ComponentKind::MeetingHud => self.meeting_rpc(netid, rpc),
            ComponentKind::ShipStatus => self.ship_rpc(rpc),
            ComponentKind::LobbyBehaviour => ignore(netid, rpc),
        }
    }

    fn player_control_rpc(&mut self, netid: u32, client_id: i32, rpc: &Rpc) {
        let player_id = self.player_id_of(client_id);
        match (rpc, player_id) {
            (Rpc::CheckName { name }, Some(pid)) if self.am_host() => {
                let resolved = self.resolve_name(pid, name);
                self.apply_name(client_id, pid, &resolved);
                self.push_rpc(netid, Rpc::SetName { name: resolved });
            }
            (Rpc::SetName { name }, Some(pid)) => self.apply_name(client_id, pid, name),
            (Rpc::CheckColor { color }, Some(pid)) if self.am_host() => {
                let resolved = self.resolve_color(pid, *color);
                self.apply_color(client_id, pid, resolved);
                self.push_rpc(netid, Rpc::SetColor { color: resolved });
            }
            (Rpc::SetColor { color }, Some(pid)) => self.apply_color(client_id, pid, *color),
            (Rpc::SetHat { hat }, Some(pid)) => {
                self.update_player(pid, |info| info.hat = *hat);
            }
            (Rpc::SetSkin { skin }, Some(pid)) => {
                self.update_player(pid, |info| info.skin = *skin);
            }
            (Rpc::SetPet { pet }, Some(pid)) => {
                self.update_player(pid, |info| info.pet = *pet);
            }
            (Rpc::CompleteTask { task_index }, Some(pid)) => {
                self.update_player(pid, |info| {
                    if let Some(task) = info.tasks.get_mut(*task_index as usize) {
                        task.completed = true;
                    }
                });
            }
            (Rpc::SetInfected { impostors }, _) => {
                for pid in impostors {
                    self.update_player(*pid, |info| info.impostor = true);
                }
            }
            (Rpc::Exiled, Some(pid)) => {
                self.update_player(pid, |info| info.dead = true);
                self.emit(RoomEvent::Exiled { client_id });
            }
            (Rpc::MurderPlayer { victim_netid }, _) => {
                let Some(victim) = self.netobjects.get(victim_netid).map(|c| c.owner_id) else {
                    return;
                };
                if let Some(victim_pid) = self.player_id_of(victim) {
                    self.update_player(victim_pid, |info| info.dead = true);
                }
                self.emit(RoomEvent::Murder {
                    murderer: client_id,
                    victim,
                });
            }
            (Rpc::SendChat { message }, _) => self.emit(RoomEvent::ChatMessage {
                client_id,
                message: message.clone(),
            }),
            (Rpc::SyncSettings { options }, _) => {
                self.settings = options.clone();
                self.emit(RoomEvent::SettingsChanged(Box::new(options.clone())));
            }
            (Rpc::SetStartCounter { sequence, counter }, _) => {
                if *sequence > self.counter_sequence || self.counter_sequence == 0 {
                    self.counter_sequence = *sequence;
                    self.emit(RoomEvent::StartCounter { counter: *counter });
                }
            }
            (Rpc::ReportDeadBody { player_id: reported }, _) if self.am_host() => {
                self.start_meeting(netid, client_id, *reported);
            }
            (Rpc::StartMeeting { player_id: reported }, _) => {
                self.emit(RoomEvent::MeetingStarted {
                    caller: client_id,
                    reported: (*reported != NO_PLAYER).then_some(*reported),
                });
            }
            _ => ignore(netid, rpc),
        }
    }

    fn player_physics_rpc(&mut self, client_id: i32, rpc: &Rpc) {
        let (vent_id, entered) = match rpc {
            Rpc::EnterVent { vent_id } => (*vent_id, true),
            Rpc::ExitVent { vent_id } => (*vent_id, false),
            _ => return,
        };
        self.emit(RoomEvent::Vented {
            client_id,
            vent_id,
            entered,
        });
    }

    fn transform_rpc(&mut self, netid: u32, client_id: i32, rpc: &Rpc) {
        let Rpc::SnapTo { position, sequence } = rpc else {
            return ignore(netid, rpc);
        };
        let Some(ComponentData::CustomNetworkTransform(cnt)) =
            self.netobjects.get_mut(&netid).map(|c| &mut c.data)
        else {
            return;
        };
        if cnt.apply(*sequence, *position, Vector2::default()) {
            self.emit(RoomEvent::Moved {
                client_id,
                position: *position,
            });
        }
    }

    fn game_data_rpc(&mut self, rpc: &Rpc) {
        match rpc {
            Rpc::SetTasks { player_id, tasks } => {
                self.update_player(*player_id, |info| info.set_tasks(tasks));
            }
            Rpc::UpdateGameData { players } => {
                for incoming in players {
                    self.update_player(incoming.player_id, |info| *info = incoming.clone());
                }
            }
            _ => tracing::trace!(rpc = rpc.id(), "game data rpc ignored"),
        }
    }

    fn vote_ban_rpc(&mut self, rpc: &Rpc) {
        let Rpc::AddVote { voter, target } = rpc else {
            return;
        };
        let Some(ComponentData::VoteBanSystem(votes)) =
            self.global_data_mut(ComponentKind::VoteBanSystem)
        else {
            return;
        };
        let count = votes.add_vote(*voter, *target);
        tracing::debug!(voter, target, count, "kick vote");
        if count >= VOTE_KICK_THRESHOLD && self.am_host() {
            self.pending.push(Payload::KickPlayer {
                code: self.code,
                client_id: *target,
                banned: false,
            });
        }
    }

    fn meeting_rpc(&mut self, netid: u32, rpc: &Rpc) {
        let am_host = self.am_host();
        match rpc {
            Rpc::CastVote { voter, suspect } => {
                self.emit(RoomEvent::VoteCast {
                    voter: *voter,
                    suspect: *suspect,
                });
                if !am_host {
                    return;
                }
                let Some(component) = self.netobjects.get_mut(&netid) else {
                    return;
                };
                let ComponentData::MeetingHud(hud) = &mut component.data else {
                    return;
                };
                if let Some(index) = hud.cast_vote(*voter, *suspect) {
                    component.dirty_bit |= 1u32.checked_shl(index as u32).unwrap_or(0);
                    if hud.all_voted() {
                        let (exiled, tie) = hud.tally();
                        let states = hud.states.iter().map(|s| s.0).collect();
                        self.push_rpc(
                            netid,
                            Rpc::VotingComplete {
                                states,
                                exiled: exiled.unwrap_or(NO_PLAYER),
                                tie,
                            },
                        );
                        self.finish_vote(exiled, tie);
                    }
                }
            }
            Rpc::VotingComplete {
                states,
                exiled,
                tie,
            } => {
                if let Some(ComponentData::MeetingHud(hud)) =
                    self.netobjects.get_mut(&netid).map(|c| &mut c.data)
                {
                    hud.states = states.iter().map(|s| VoteState(*s)).collect();
                }
                self.finish_vote((*exiled != NO_PLAYER).then_some(*exiled), *tie);
            }
            Rpc::ClearVote => {
                let Some(pid) = self.player_id_of(self.client_id) else {
                    return;
                };
                if let Some(ComponentData::MeetingHud(hud)) =
                    self.netobjects.get_mut(&netid).map(|c| &mut c.data)
                {
                    if let Some(state) = hud.area_of(pid).and_then(|i| hud.states.get_mut(i)) {
                        state.clear_vote();
                    }
                }
            }
            Rpc::Close => self.emit(RoomEvent::MeetingClosed),
            _ => ignore(netid, rpc),
        }
    }

    fn finish_vote(&mut self, exiled: Option<u8>, tie: bool) {
        self.emit(RoomEvent::VotingComplete { exiled, tie });
        let Some(pid) = exiled else {
            return;
        };
        self.update_player(pid, |info| info.dead = true);
        if let Some(client_id) = self.client_of_player(pid) {
            self.emit(RoomEvent::Exiled { client_id });
        }
    }

    fn ship_rpc(&mut self, rpc: &Rpc) {
        match rpc {
            Rpc::RepairSystem {
                system,
                player_netid,
                amount,
            } => {
                let Some(system) = SystemType::from_u8(*system) else {
                    tracing::debug!(system, "repair for unknown system");
                    return;
                };
                let client_id = self
                    .netobjects
                    .get(player_netid)
                    .map_or(GLOBAL_OWNER, |c| c.owner_id);
                let player_id = self.player_id_of(client_id).unwrap_or(NO_PLAYER);
                if self.am_host() {
                    self.repair(system, player_id, *amount);
                }
                self.emit(RoomEvent::SystemRepaired {
                    system,
                    client_id,
                    amount: *amount,
                });
            }
            Rpc::CloseDoorsOfType { system } => {
                if let Some(system) = SystemType::from_u8(*system) {
                    self.emit(RoomEvent::DoorsClosed { system });
                }
            }
            _ => tracing::trace!(rpc = rpc.id(), "ship rpc ignored"),
        }
    }

    fn repair(&mut self, system: SystemType, player_id: u8, amount: u8) {
        let Some(netid) = self.netid_of(GLOBAL_OWNER, ComponentKind::ShipStatus) else {
            return;
        };
        let Some(component) = self.netobjects.get_mut(&netid) else {
            return;
        };
        let ComponentData::ShipStatus(ship) = &mut component.data else {
            return;
        };
        if let Some(state) = ship.system_mut(system) {
            if state.apply_repair(player_id, amount) {
                component.mark_dirty(ShipStatus::dirty_bit(system));
            }
        }
    }

    fn start_meeting(&mut self, netid: u32, caller: i32, reported: u8) {
        if self.netid_of(GLOBAL_OWNER, ComponentKind::MeetingHud).is_some() {
            tracing::debug!(caller, "meeting already running");
            return;
        }
        self.push_rpc(netid, Rpc::StartMeeting { player_id: reported });
        if let Err(e) = self.spawn_prefab(SpawnType::MeetingHud, GLOBAL_OWNER) {
            tracing::warn!(error = %e, "could not spawn meeting hud");
            return;
        }
        self.emit(RoomEvent::MeetingStarted {
            caller,
            reported: (reported != NO_PLAYER).then_some(reported),
        });
    }

    // -----------------------------------------------------------------------
    // Host arbitration
    // -----------------------------------------------------------------------

    fn resolve_name(&self, player_id: u8, requested: &str) -> String {
        let taken: Vec<&str> = self
            .game_data()
            .map(|table| {
                table
                    .players
                    .values()
                    .filter(|info| info.player_id != player_id)
                    .map(|info| info.name.as_str())
                    .collect()
            })
            .unwrap_or_default();
        let mut candidate = requested.to_string();
        let mut suffix = 1;
        while taken.contains(&candidate.as_str()) {
            candidate = format!("{requested} {suffix}");
            suffix += 1;
        }
        candidate
    }

    fn resolve_color(&self, player_id: u8, requested: u8) -> u8 {
        let taken: Vec<u8> = self
            .game_data()
            .map(|table| {
                table
                    .players
                    .values()
                    .filter(|info| info.player_id != player_id)
                    .map(|info| info.color)
                    .collect()
            })
            .unwrap_or_default();
        let start = requested % COLOR_COUNT;
        (0..COLOR_COUNT)
            .map(|offset| (start + offset) % COLOR_COUNT)
            .find(|color| !taken.contains(color))
            .unwrap_or(start)
    }

    fn apply_name(&mut self, client_id: i32, player_id: u8, name: &str) {
        self.update_player(player_id, |info| info.name = name.to_string());
        self.emit(RoomEvent::NameChanged {
            client_id,
            name: name.to_string(),
        });
    }

    fn apply_color(&mut self, client_id: i32, player_id: u8, color: u8) {
        self.update_player(player_id, |info| info.color = color);
        self.emit(RoomEvent::ColorChanged { client_id, color });
    }

    /// Mutates a player's record in the GameData table, marking it dirty
    /// when we are host. Returns `None` if the table is not spawned.
    fn update_player<R>(&mut self, player_id: u8, f: impl FnOnce(&mut PlayerInfo) -> R) -> Option<R> {
        let am_host = self.am_host();
        let netid = self.netid_of(GLOBAL_OWNER, ComponentKind::GameData)?;
        let component = self.netobjects.get_mut(&netid)?;
        let ComponentData::GameData(table) = &mut component.data else {
            return None;
        };
        let result = f(table.entry(player_id));
        if am_host {
            component.mark_dirty(GameData::dirty_bit(player_id));
        }
        Some(result)
    }

    // -----------------------------------------------------------------------
    // Spawning
    // -----------------------------------------------------------------------

    fn accepts_owner(&self, spawn_type: SpawnType, owner_id: i32) -> bool {
        let player_prefab = spawn_type == SpawnType::Player;
        player_prefab == (owner_id != GLOBAL_OWNER)
    }

    /// Lowest player id not used by any PlayerControl or GameData entry.
    fn free_player_id(&self) -> Option<u8> {
        let mut used: Vec<u8> = self
            .netobjects
            .values()
            .filter_map(|c| match &c.data {
                ComponentData::PlayerControl(pc) => Some(pc.player_id),
                _ => None,
            })
            .collect();
        if let Some(table) = self.game_data() {
            used.extend(table.players.keys());
        }
        (0..MAX_PLAYER_ID).find(|id| !used.contains(id))
    }

    /// Player ids in meeting-area order.
    fn area_players(&self) -> Vec<u8> {
        self.game_data()
            .map(|table| table.players.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Spawns a prefab (host only). Returns the new netids in prefab
    /// order and queues the Spawn message.
    pub fn spawn_prefab(&mut self, spawn_type: SpawnType, owner_id: i32) -> Result<Vec<u32>, RoomError> {
        if !self.am_host() {
            return Err(RoomError::NotHost);
        }
        if !self.accepts_owner(spawn_type, owner_id) {
            return Err(RoomError::InvalidOwner(owner_id));
        }
        let player_id = if spawn_type == SpawnType::Player {
            Some(self.free_player_id().ok_or(RoomError::NoFreePlayerSlot)?)
        } else {
            None
        };
        if owner_id != GLOBAL_OWNER {
            self.handle_join(owner_id);
        }

        let flags = if spawn_type == SpawnType::Player {
            SPAWN_FLAG_CLIENT_CHARACTER
        } else {
            0
        };
        let mut spawn = SpawnMessage {
            spawn_type: spawn_type.as_u32(),
            owner_id,
            flags,
            components: Vec::new(),
        };
        let mut netids = Vec::new();
        for kind in prefab_components(spawn_type) {
            let mut data = ComponentData::new(*kind, spawn_type);
            match &mut data {
                ComponentData::PlayerControl(pc) => {
                    pc.is_new = true;
                    pc.player_id = player_id.unwrap_or_default();
                }
                ComponentData::MeetingHud(hud) => self.prepare_meeting(hud),
                ComponentData::ShipStatus(ship) => {
                    tracing::debug!(map = ?ship.map, systems = ship.systems.len(), "spawning ship");
                }
                _ => {}
            }
            let netid = self.next_netid;
            self.next_netid = self.next_netid.wrapping_add(1);
            let mut component = Component::new(netid, owner_id, spawn_type, data);
            spawn.components.push(SpawnComponent {
                netid,
                data: component.full_state()?,
            });
            if let ComponentData::PlayerControl(pc) = &mut component.data {
                pc.is_new = false;
            }
            self.insert_component(component);
            netids.push(netid);
        }
        self.stream.push(GameDataMessage::Spawn(spawn));

        if let Some(pid) = player_id {
            self.update_player(pid, |_| ());
        }
        tracing::debug!(?spawn_type, owner_id, ?netids, "spawned prefab");
        Ok(netids)
    }

    fn prepare_meeting(&self, hud: &mut MeetingHud) {
        hud.players = self.area_players();
        hud.states = hud
            .players
            .iter()
            .map(|pid| {
                let dead = self
                    .game_data()
                    .and_then(|t| t.player(*pid))
                    .is_some_and(|info| info.dead || info.disconnected);
                VoteState::new(dead, false)
            })
            .collect();
    }

    /// Removes a component we own or host and tells everyone.
    pub fn despawn_component(&mut self, netid: u32) -> bool {
        if !self.remove_component(netid) {
            return false;
        }
        self.stream.push(GameDataMessage::Despawn { netid });
        true
    }

    /// Registers a component in `netobjects` and its owner's slot. A
    /// previous occupant of the slot is removed first.
    fn insert_component(&mut self, component: Component) {
        let (netid, owner_id, kind) = (component.netid, component.owner_id, component.kind());
        let owner = self.objects.entry(owner_id).or_insert_with(|| {
            if owner_id == GLOBAL_OWNER {
                Owner::global()
            } else {
                Owner::player(owner_id)
            }
        });
        if owner.kind() != kind.owner_kind() {
            tracing::warn!(netid, owner_id, ?kind, "component does not fit owner");
            return;
        }
        let previous = owner.set_slot(kind.slot(), netid);
        if let Some(previous) = previous.filter(|p| *p != netid) {
            tracing::debug!(netid, previous, "slot reused, dropping previous component");
            self.netobjects.remove(&previous);
            self.emit(RoomEvent::Despawned { netid: previous });
        }
        self.netobjects.insert(netid, component);
        self.emit(RoomEvent::Spawned {
            netid,
            owner_id,
            kind,
        });
    }

    /// Removes a component locally. Absent netids are not an error.
    fn remove_component(&mut self, netid: u32) -> bool {
        let Some(component) = self.netobjects.remove(&netid) else {
            return false;
        };
        if let Some(owner) = self.objects.get_mut(&component.owner_id) {
            owner.clear_netid(netid);
        }
        self.emit(RoomEvent::Despawned { netid });
        true
    }

    /// Every live component as Spawn messages, one per owner and prefab,
    /// components in slot order.
    fn snapshot(&self) -> Result<Vec<GameDataMessage>, RoomError> {
        let mut messages = Vec::new();
        for (owner_id, owner) in &self.objects {
            let mut groups: BTreeMap<SpawnType, Vec<SpawnComponent>> = BTreeMap::new();
            for (_, netid) in owner.components() {
                let Some(component) = self.netobjects.get(&netid) else {
                    continue;
                };
                groups
                    .entry(component.spawn_type)
                    .or_default()
                    .push(SpawnComponent {
                        netid,
                        data: component.full_state()?,
                    });
            }
            for (spawn_type, components) in groups {
                let flags = if spawn_type == SpawnType::Player {
                    SPAWN_FLAG_CLIENT_CHARACTER
                } else {
                    0
                };
                messages.push(GameDataMessage::Spawn(SpawnMessage {
                    spawn_type: spawn_type.as_u32(),
                    owner_id: *owner_id,
                    flags,
                    components,
                }));
            }
        }
        Ok(messages)
    }

    fn global_data_mut(&mut self, kind: ComponentKind) -> Option<&mut ComponentData> {
        let netid = self.netid_of(GLOBAL_OWNER, kind)?;
        self.netobjects.get_mut(&netid).map(|c| &mut c.data)
    }

    // -----------------------------------------------------------------------
    // Local actions
    // -----------------------------------------------------------------------

    fn local_netid(&self, kind: ComponentKind) -> Result<u32, RoomError> {
        if !self.state.in_game() {
            return Err(RoomError::NotJoined);
        }
        self.netid_of(self.client_id, kind)
            .ok_or(RoomError::PlayerNotSpawned)
    }

    fn push_rpc(&mut self, netid: u32, rpc: Rpc) {
        self.stream.push(GameDataMessage::Rpc { netid, rpc });
    }

    pub fn queue_payload(&mut self, payload: Payload) {
        self.pending.push(payload);
    }

    /// Announces that this client has loaded the lobby. As host, also
    /// spawns the lobby, the game table and our own player.
    pub fn announce_scene(&mut self) -> Result<(), RoomError> {
        if !self.state.in_game() {
            return Err(RoomError::NotJoined);
        }
        self.stream.push(GameDataMessage::SceneChange {
            client_id: self.client_id,
            scene: self.config.in_scene_sentinel.clone(),
        });
        if let Some(owner) = self.objects.get_mut(&self.client_id) {
            owner.in_scene = true;
        }
        if !self.am_host() {
            return Ok(());
        }
        if self.netid_of(GLOBAL_OWNER, ComponentKind::LobbyBehaviour).is_none() {
            self.spawn_prefab(SpawnType::LobbyBehaviour, GLOBAL_OWNER)?;
        }
        if self.netid_of(GLOBAL_OWNER, ComponentKind::GameData).is_none() {
            self.spawn_prefab(SpawnType::GameData, GLOBAL_OWNER)?;
        }
        if self.netid_of(self.client_id, ComponentKind::PlayerControl).is_none() {
            self.spawn_prefab(SpawnType::Player, self.client_id)?;
        }
        Ok(())
    }

    /// Asks for a name. The host applies it directly (after resolving
    /// conflicts); everyone else asks the host with CheckName.
    pub fn set_name(&mut self, name: &str) -> Result<(), RoomError> {
        let netid = self.local_netid(ComponentKind::PlayerControl)?;
        let pid = self.player_id_of(self.client_id).ok_or(RoomError::PlayerNotSpawned)?;
        if self.am_host() {
            let resolved = self.resolve_name(pid, name);
            self.apply_name(self.client_id, pid, &resolved);
            self.push_rpc(netid, Rpc::SetName { name: resolved });
        } else {
            self.push_rpc(netid, Rpc::CheckName { name: name.to_string() });
        }
        Ok(())
    }

    pub fn set_color(&mut self, color: u8) -> Result<(), RoomError> {
        let netid = self.local_netid(ComponentKind::PlayerControl)?;
        let pid = self.player_id_of(self.client_id).ok_or(RoomError::PlayerNotSpawned)?;
        if self.am_host() {
            let resolved = self.resolve_color(pid, color);
            self.apply_color(self.client_id, pid, resolved);
            self.push_rpc(netid, Rpc::SetColor { color: resolved });
        } else {
            self.push_rpc(netid, Rpc::CheckColor { color });
        }
        Ok(())
    }

    pub fn send_chat(&mut self, message: &str) -> Result<(), RoomError> {
        let netid = self.local_netid(ComponentKind::PlayerControl)?;
        self.push_rpc(
            netid,
            Rpc::SendChat {
                message: message.to_string(),
            },
        );
        Ok(())
    }

    /// Moves our player; the position goes out with the next flush.
    pub fn move_to(&mut self, position: Vector2, velocity: Vector2) -> Result<(), RoomError> {
        let netid = self.local_netid(ComponentKind::CustomNetworkTransform)?;
        if let Some(component) = self.netobjects.get_mut(&netid) {
            if let ComponentData::CustomNetworkTransform(cnt) = &mut component.data {
                cnt.advance(position, velocity);
                component.mark_dirty(WHOLE);
            }
        }
        Ok(())
    }

    pub fn set_settings(&mut self, options: GameOptions) -> Result<(), RoomError> {
        if !self.am_host() {
            return Err(RoomError::NotHost);
        }
        let netid = self.local_netid(ComponentKind::PlayerControl)?;
        self.settings = options.clone();
        self.emit(RoomEvent::SettingsChanged(Box::new(options.clone())));
        self.push_rpc(netid, Rpc::SyncSettings { options });
        Ok(())
    }

    pub fn kick_player(&mut self, client_id: i32, banned: bool) -> Result<(), RoomError> {
        if !self.am_host() {
            return Err(RoomError::NotHost);
        }
        if !self.objects.contains_key(&client_id) {
            return Err(RoomError::UnknownPlayer(client_id));
        }
        self.pending.push(Payload::KickPlayer {
            code: self.code,
            client_id,
            banned,
        });
        Ok(())
    }

    pub fn set_public(&mut self, is_public: bool) -> Result<(), RoomError> {
        if !self.am_host() {
            return Err(RoomError::NotHost);
        }
        self.pending.push(Payload::AlterGame {
            code: self.code,
            is_public,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Starting
    // -----------------------------------------------------------------------

    /// Queues StartGame and counts this client as ready. The Ready
    /// message itself answers the server's StartGame broadcast.
    pub fn begin_start(&mut self) -> Result<(), RoomError> {
        if !self.am_host() {
            return Err(RoomError::NotHost);
        }
        if self.state != RoomState::Joined {
            return Err(RoomError::NotJoined);
        }
        for owner in self.objects.values_mut() {
            owner.ready = false;
        }
        self.pending.push(Payload::StartGame { code: self.code });
        self.mark_ready(self.client_id);
        Ok(())
    }

    pub fn unready_players(&self) -> Vec<i32> {
        self.objects
            .values()
            .filter(|o| o.kind() == OwnerKind::Player && !o.ready)
            .map(Owner::id)
            .collect()
    }

    pub fn all_ready(&self) -> bool {
        self.unready_players().is_empty()
    }

    /// Queues a RemovePlayer for everyone not ready. Returns their ids.
    pub fn remove_stragglers(&mut self) -> Vec<i32> {
        let stragglers = self.unready_players();
        for client_id in &stragglers {
            tracing::info!(client_id, "removing player that never became ready");
            self.pending.push(Payload::RemovePlayer(RemovePlayer::Request {
                code: self.code,
                client_id: *client_id,
                reason: DisconnectReason::Error,
            }));
        }
        stragglers
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Drains everything queued since the last flush: dirty component
    /// deltas and the broadcast stream as one GameData payload, then
    /// directed batches, then control payloads.
    pub fn flush(&mut self) -> Vec<Payload> {
        let mut dirty: Vec<u32> = self
            .netobjects
            .values()
            .filter(|c| c.dirty_bit != 0)
            .map(|c| c.netid)
            .collect();
        dirty.sort_unstable();
        for netid in dirty {
            let Some(component) = self.netobjects.get_mut(&netid) else {
                continue;
            };
            match component.take_delta() {
                Ok(Some(data)) => self.stream.push(GameDataMessage::Data { netid, data }),
                Ok(None) => {}
                Err(e) => tracing::warn!(netid, error = %e, "failed to serialise delta"),
            }
        }

        let mut payloads = Vec::new();
        if !self.stream.is_empty() {
            payloads.push(Payload::GameData {
                code: self.code,
                messages: std::mem::take(&mut self.stream),
            });
        }
        for (recipient, messages) in self.directed.drain(..) {
            payloads.push(Payload::GameDataTo {
                code: self.code,
                recipient,
                messages,
            });
        }
        payloads.append(&mut self.pending);
        payloads
    }

    /// Verifies that `netobjects` and the owner slots describe the same
    /// set of components.
    pub fn check_integrity(&self) -> Result<(), RoomError> {
        let globals = self
            .objects
            .values()
            .filter(|o| o.kind() == OwnerKind::Global)
            .count();
        if globals != 1 || !self.objects.contains_key(&GLOBAL_OWNER) {
            return Err(RoomError::Integrity(format!("{globals} global owners")));
        }
        for (netid, component) in &self.netobjects {
            let owner = self.objects.get(&component.owner_id).ok_or_else(|| {
                RoomError::Integrity(format!("netid {netid} has missing owner {}", component.owner_id))
            })?;
            if owner.slot(component.kind().slot()) != Some(*netid) {
                return Err(RoomError::Integrity(format!(
                    "netid {netid} not in slot {} of owner {}",
                    component.kind().slot(),
                    component.owner_id
                )));
            }
        }
        for (owner_id, owner) in &self.objects {
            for (slot, netid) in owner.components() {
                let component = self.netobjects.get(&netid).ok_or_else(|| {
                    RoomError::Integrity(format!("owner {owner_id} slot {slot} holds dead netid {netid}"))
                })?;
                if component.owner_id != *owner_id || component.kind().slot() != slot {
                    return Err(RoomError::Integrity(format!(
                        "netid {netid} registered under owner {owner_id} slot {slot}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn ignore(netid: u32, rpc: &Rpc) {
    tracing::trace!(netid, rpc = rpc.id(), "rpc ignored");
}

// ---------------------------------------------------------------------------
// Starting a game
// ---------------------------------------------------------------------------

/// Host start sequence: queue StartGame, wait until every player is
/// ready or the configured timeout passes, then remove whoever is
/// still not ready. Returns the removed client ids.
///
/// The room lock is only held between waits, so the caller's packet
/// loop keeps feeding Ready messages in.
///
/// # Errors
/// [`RoomError::Disconnected`] if the connection drops while waiting;
/// nothing is left queued in that case.
pub async fn start_game(room: &tokio::sync::Mutex<Room>) -> Result<Vec<i32>, RoomError> {
    let (notify, timeout) = {
        let mut room = room.lock().await;
        room.begin_start()?;
        (room.ready_notify(), room.config().start_ready_timeout)
    };
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        {
            let room = room.lock().await;
            if room.state() == RoomState::Connecting {
                return Err(RoomError::Disconnected);
            }
            if room.all_ready() {
                break;
            }
        }
        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            break;
        }
    }
    let mut room = room.lock().await;
    if room.state() == RoomState::Connecting {
        return Err(RoomError::Disconnected);
    }
    Ok(room.remove_stragglers())
}
