//! Raw protocol stanzas for operations the library exposes no helper for:
//! companion logout, read receipts, presence, chat state, and group IQs.
//!
//! Builders and parsers are pure; `send_iq` and `send_node` are the only
//! calls into the library.

use wacore_binary::jid::Jid;
use wacore_binary::node::{Node, NodeContent};
use wagate_core::{
    error::GatewayError,
    protocol::{ChatPresenceState, GroupInfo, GroupParticipant, ParticipantAction},
};
use whatsapp_rust::client::Client;
use whatsapp_rust::request::{InfoQuery, InfoQueryType};

pub(super) const SERVER: &str = "s.whatsapp.net";
pub(super) const GROUP_SERVER: &str = "g.us";
const INVITE_PREFIX: &str = "https://chat.whatsapp.com/";

pub(super) fn node(tag: &str, attrs: &[(&str, &str)], content: Option<NodeContent>) -> Node {
    Node {
        tag: tag.to_string(),
        attrs: attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        content,
    }
}

fn attr<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.attrs.get(key).map(|v| v.as_str())
}

fn children(node: &Node) -> &[Node] {
    match &node.content {
        Some(NodeContent::Nodes(nodes)) => nodes,
        _ => &[],
    }
}

fn child<'a>(node: &'a Node, tag: &str) -> Option<&'a Node> {
    children(node).iter().find(|c| c.tag == tag)
}

fn text(node: &Node) -> Option<String> {
    match &node.content {
        Some(NodeContent::String(s)) => Some(s.clone()),
        Some(NodeContent::Bytes(b)) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}

/// `user:device@server` -> `user@server`.
pub(super) fn to_non_ad(jid: &str) -> String {
    match jid.split_once('@') {
        Some((user, server)) => {
            let user = user.split(':').next().unwrap_or(user);
            format!("{user}@{server}")
        }
        None => jid.to_string(),
    }
}

/// Ask the server to unlink this companion device.
pub(super) fn remove_companion(own_jid: &str) -> Node {
    node(
        "remove-companion-device",
        &[("jid", own_jid), ("reason", "user_initiated")],
        None,
    )
}

/// Read receipt for `ids`; `participant` is required for group chats.
pub(super) fn read_receipt(chat: &str, participant: Option<&str>, ids: &[String], at: i64) -> Node {
    let first = ids.first().map(String::as_str).unwrap_or_default();
    let t = at.to_string();
    let mut attrs = vec![("id", first), ("type", "read"), ("to", chat), ("t", t.as_str())];
    if let Some(p) = participant.filter(|p| !p.is_empty()) {
        attrs.push(("participant", p));
    }
    let list = (ids.len() > 1).then(|| {
        let items = ids[1..]
            .iter()
            .map(|id| node("item", &[("id", id)], None))
            .collect();
        NodeContent::Nodes(vec![node("list", &[], Some(NodeContent::Nodes(items)))])
    });
    node("receipt", &attrs, list)
}

pub(super) fn presence(available: bool, push_name: &str) -> Node {
    let kind = if available { "available" } else { "unavailable" };
    if available && !push_name.is_empty() {
        node("presence", &[("type", kind), ("name", push_name)], None)
    } else {
        node("presence", &[("type", kind)], None)
    }
}

pub(super) fn chat_state(chat: &str, state: ChatPresenceState) -> Node {
    let inner = match state {
        ChatPresenceState::Composing => node("composing", &[], None),
        ChatPresenceState::Recording => node("composing", &[("media", "audio")], None),
        ChatPresenceState::Paused => node("paused", &[], None),
    };
    node("chatstate", &[("to", chat)], Some(NodeContent::Nodes(vec![inner])))
}

pub(super) fn group_create(name: &str, participants: &[String], key: &str) -> Node {
    let members = participants
        .iter()
        .map(|p| node("participant", &[("jid", p)], None))
        .collect();
    node(
        "create",
        &[("subject", name), ("key", key)],
        Some(NodeContent::Nodes(members)),
    )
}

pub(super) fn group_query() -> Node {
    node("query", &[("request", "interactive")], None)
}

pub(super) fn group_participating() -> Node {
    node(
        "participating",
        &[],
        Some(NodeContent::Nodes(vec![
            node("participants", &[], None),
            node("description", &[], None),
        ])),
    )
}

pub(super) fn group_leave(jid: &str) -> Node {
    node(
        "leave",
        &[],
        Some(NodeContent::Nodes(vec![node("group", &[("id", jid)], None)])),
    )
}

pub(super) fn group_subject(name: &str) -> Node {
    node("subject", &[], Some(NodeContent::String(name.to_string())))
}

/// An empty topic deletes the description.
pub(super) fn group_description(topic: &str, id: &str, prev: Option<&str>) -> Node {
    let mut attrs = vec![("id", id)];
    if let Some(prev) = prev {
        attrs.push(("prev", prev));
    }
    if topic.is_empty() {
        attrs.push(("delete", "true"));
        return node("description", &attrs, None);
    }
    let body = node("body", &[], Some(NodeContent::String(topic.to_string())));
    node("description", &attrs, Some(NodeContent::Nodes(vec![body])))
}

pub(super) fn group_participants(action: ParticipantAction, members: &[String]) -> Node {
    let tag = match action {
        ParticipantAction::Add => "add",
        ParticipantAction::Remove => "remove",
        ParticipantAction::Promote => "promote",
        ParticipantAction::Demote => "demote",
    };
    let items = members
        .iter()
        .map(|p| node("participant", &[("jid", p)], None))
        .collect();
    node(tag, &[], Some(NodeContent::Nodes(items)))
}

pub(super) fn group_invite() -> Node {
    node("invite", &[], None)
}

pub(super) fn group_join(code: &str) -> Node {
    node("invite", &[("code", code)], None)
}

fn group_jid(id: &str) -> String {
    if id.contains('@') {
        id.to_string()
    } else {
        format!("{id}@{GROUP_SERVER}")
    }
}

/// Parse a `<group>` element from a w:g2 response.
pub(super) fn parse_group(group: &Node) -> GroupInfo {
    let description = child(group, "description");
    GroupInfo {
        jid: attr(group, "id").map(group_jid).unwrap_or_default(),
        name: attr(group, "subject").unwrap_or_default().to_string(),
        topic: description.and_then(|d| child(d, "body")).and_then(text),
        owner: attr(group, "creator").map(str::to_string),
        participants: children(group)
            .iter()
            .filter(|c| c.tag == "participant")
            .map(|p| {
                let kind = attr(p, "type").unwrap_or_default();
                GroupParticipant {
                    jid: attr(p, "jid").unwrap_or_default().to_string(),
                    is_admin: kind == "admin" || kind == "superadmin",
                    is_super_admin: kind == "superadmin",
                }
            })
            .collect(),
    }
}

/// The `<group>` element of a response, or the response itself.
pub(super) fn response_group(resp: &Node) -> Result<GroupInfo, GatewayError> {
    if resp.tag == "group" {
        return Ok(parse_group(resp));
    }
    child(resp, "group")
        .map(parse_group)
        .ok_or_else(|| GatewayError::Protocol("group response without <group>".into()))
}

pub(super) fn response_groups(resp: &Node) -> Vec<GroupInfo> {
    let list = child(resp, "groups").unwrap_or(resp);
    children(list)
        .iter()
        .filter(|c| c.tag == "group")
        .map(parse_group)
        .collect()
}

/// Current description id, needed as `prev` when replacing the topic.
pub(super) fn description_id(resp: &Node) -> Option<String> {
    let group = if resp.tag == "group" {
        Some(resp)
    } else {
        child(resp, "group")
    };
    group
        .and_then(|g| child(g, "description"))
        .and_then(|d| attr(d, "id"))
        .map(str::to_string)
}

pub(super) fn response_invite_link(resp: &Node) -> Result<String, GatewayError> {
    let invite = if resp.tag == "invite" {
        Some(resp)
    } else {
        child(resp, "invite")
    };
    invite
        .and_then(|i| attr(i, "code"))
        .map(|code| format!("{INVITE_PREFIX}{code}"))
        .ok_or_else(|| GatewayError::Protocol("invite response without code".into()))
}

pub(super) fn response_joined_jid(resp: &Node) -> Result<String, GatewayError> {
    child(resp, "group")
        .and_then(|g| attr(g, "jid").or_else(|| attr(g, "id")))
        .map(group_jid)
        .ok_or_else(|| GatewayError::Protocol("join response without group".into()))
}

pub(super) fn parse_jid(raw: &str) -> Result<Jid, GatewayError> {
    raw.parse()
        .map_err(|e| GatewayError::InvalidJid(format!("{raw}: {e}")))
}

/// Send an IQ and wait for its result node.
pub(super) async fn send_iq(
    client: &Client,
    namespace: &'static str,
    set: bool,
    to: &str,
    content: Node,
) -> Result<Node, GatewayError> {
    let query = InfoQuery {
        namespace,
        query_type: if set {
            InfoQueryType::Set
        } else {
            InfoQueryType::Get
        },
        to: parse_jid(to)?,
        target: None,
        id: None,
        content: Some(NodeContent::Nodes(vec![content])),
        timeout: None,
    };
    client.send_iq(query).await.map_err(|e| {
        let msg = format!("{namespace} iq to {to}: {e}");
        if msg.to_lowercase().contains("timeout") || msg.to_lowercase().contains("timed out") {
            GatewayError::ProtocolTimeout(msg)
        } else {
            GatewayError::Protocol(msg)
        }
    })
}

/// Fire-and-forget stanza (receipts, presence, chat state).
pub(super) async fn send_node(client: &Client, stanza: Node) -> Result<(), GatewayError> {
    let tag = stanza.tag.clone();
    client
        .send_node(stanza)
        .await
        .map_err(|e| GatewayError::Protocol(format!("send {tag}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_ad_strips_device() {
        assert_eq!(
            to_non_ad("15551234567:12@s.whatsapp.net"),
            "15551234567@s.whatsapp.net"
        );
        assert_eq!(to_non_ad("15551234567@s.whatsapp.net"), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn test_remove_companion_names_own_device() {
        let n = remove_companion("1555:3@s.whatsapp.net");
        assert_eq!(n.tag, "remove-companion-device");
        assert_eq!(attr(&n, "jid"), Some("1555:3@s.whatsapp.net"));
        assert_eq!(attr(&n, "reason"), Some("user_initiated"));
    }

    #[test]
    fn test_read_receipt_lists_extra_ids() {
        let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let n = read_receipt("123-456@g.us", Some("1555@s.whatsapp.net"), &ids, 1_700_000_000);
        assert_eq!(attr(&n, "id"), Some("A"));
        assert_eq!(attr(&n, "type"), Some("read"));
        assert_eq!(attr(&n, "participant"), Some("1555@s.whatsapp.net"));
        let list = child(&n, "list").unwrap();
        let extra: Vec<_> = children(list).iter().filter_map(|i| attr(i, "id")).collect();
        assert_eq!(extra, ["B", "C"]);

        let single = read_receipt("1555@s.whatsapp.net", None, &ids[..1], 1);
        assert!(single.content.is_none());
        assert!(attr(&single, "participant").is_none());
    }

    #[test]
    fn test_chat_state_variants() {
        let rec = chat_state("1@s.whatsapp.net", ChatPresenceState::Recording);
        let inner = &children(&rec)[0];
        assert_eq!(inner.tag, "composing");
        assert_eq!(attr(inner, "media"), Some("audio"));
        let paused = chat_state("1@s.whatsapp.net", ChatPresenceState::Paused);
        assert_eq!(children(&paused)[0].tag, "paused");
    }

    #[test]
    fn test_parse_group_response() {
        let body = node("body", &[], Some(NodeContent::String("rules".into())));
        let group = node(
            "group",
            &[("id", "120363-1"), ("subject", "Team"), ("creator", "1@s.whatsapp.net")],
            Some(NodeContent::Nodes(vec![
                node("description", &[("id", "D1")], Some(NodeContent::Nodes(vec![body]))),
                node("participant", &[("jid", "1@s.whatsapp.net"), ("type", "superadmin")], None),
                node("participant", &[("jid", "2@s.whatsapp.net")], None),
            ])),
        );
        let resp = node("iq", &[], Some(NodeContent::Nodes(vec![group])));

        let info = response_group(&resp).unwrap();
        assert_eq!(info.jid, "120363-1@g.us");
        assert_eq!(info.name, "Team");
        assert_eq!(info.topic.as_deref(), Some("rules"));
        assert_eq!(info.owner.as_deref(), Some("1@s.whatsapp.net"));
        assert_eq!(info.participants.len(), 2);
        assert!(info.participants[0].is_super_admin && info.participants[0].is_admin);
        assert!(!info.participants[1].is_admin);
        assert_eq!(description_id(&resp).as_deref(), Some("D1"));
    }

    #[test]
    fn test_description_delete_when_empty() {
        let n = group_description("", "N1", Some("D1"));
        assert_eq!(attr(&n, "delete"), Some("true"));
        assert_eq!(attr(&n, "prev"), Some("D1"));
        assert!(n.content.is_none());
    }

    #[test]
    fn test_invite_link_and_join_parsing() {
        let resp = node(
            "iq",
            &[],
            Some(NodeContent::Nodes(vec![node("invite", &[("code", "AbC")], None)])),
        );
        assert_eq!(
            response_invite_link(&resp).unwrap(),
            "https://chat.whatsapp.com/AbC"
        );
        let joined = node(
            "iq",
            &[],
            Some(NodeContent::Nodes(vec![node("group", &[("jid", "99-1@g.us")], None)])),
        );
        assert_eq!(response_joined_jid(&joined).unwrap(), "99-1@g.us");
    }
}
