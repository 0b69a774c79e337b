//! Provisioning test clients
//!
//! A client connects over TCP with `CLIENT;<v>;<auth>;<command>;..;<phone>;<password>`,
//! asks the service to send `imei<password>` to a new tracker and gets the
//! tracker's answer relayed back on its connection.

use crate::error::Result;
use crate::modem::response::normalize_phone;
use crate::modem::SmsGateway;
use crate::tcp::{TcpEvent, TcpLink};
use dashmap::DashMap;
use tracing::{debug, info, warn};

const CONNECT: &str = "CONNECT";
const TEST: &str = "TEST";

#[derive(Debug, Clone)]
pub struct TestClient {
    pub id: String,
    /// Normalized number of the tracker under test
    pub phone: Option<String>,
    pub link: TcpLink,
}

impl TestClient {
    /// Relay the tracker's answer and end the session
    pub fn relay_sms(&self, text: &str) {
        info!("Client {} received answer from {:?}", self.id, self.phone);
        reply(&self.link, &format!("IMEI: {}", text.trim()));
        self.link.close();
    }

    pub fn relay_report(&self) {
        reply(&self.link, "DELIVERY REPORT");
    }
}

fn reply(link: &TcpLink, text: &str) {
    if let Err(e) = link.write_line(text) {
        debug!("Client reply {} not written: {}", text, e);
    }
}

pub struct ClientSessions {
    sessions: DashMap<String, TestClient>,
    country_code: String,
}

impl ClientSessions {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            country_code: country_code.into(),
        }
    }

    pub async fn handle(
        &self,
        event: &TcpEvent,
        link: TcpLink,
        sms: &dyn SmsGateway,
    ) -> Result<()> {
        let client = self.bind(&event.identity, link);
        let command = event.fields.get(3).map(|c| c.trim().to_ascii_uppercase());
        match command.as_deref() {
            Some(CONNECT) => {
                info!("Client {} connected from {}", client.id, client.link.peer());
                reply(&client.link, "AUTH: OK");
            },
            Some(TEST) => {
                let Some(phone) = event.fields.get(5).filter(|phone| !phone.trim().is_empty())
                else {
                    warn!("Client {} asked for a test without a phone number", client.id);
                    return Ok(());
                };
                let password = event.fields.get(6).map(String::as_str).unwrap_or("");
                if let Some(mut session) = self.sessions.get_mut(&client.id) {
                    session.phone = Some(normalize_phone(phone, &self.country_code));
                }
                match sms.send_sms(phone.trim(), &format!("imei{}", password)).await {
                    Ok(_) => reply(&client.link, "SMS SENT"),
                    Err(e) => {
                        warn!("Client {} test SMS to {} failed: {}", client.id, phone, e);
                        reply(&client.link, &e.to_string());
                    },
                }
            },
            other => warn!("Unknown command {:?} from client {}", other, client.id),
        }
        Ok(())
    }

    /// Attach `link`; a different previous connection is closed
    fn bind(&self, id: &str, link: TcpLink) -> TestClient {
        let mut entry = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| TestClient {
                id: id.to_string(),
                phone: None,
                link: link.clone(),
            });
        if !entry.link.same_connection(&link) {
            info!(
                "Client {} moved from {} to {}",
                id,
                entry.link.peer(),
                link.peer()
            );
            entry.link.close();
            entry.link = link;
        }
        entry.clone()
    }

    pub fn find_by_phone(&self, phone: &str) -> Option<TestClient> {
        let phone = normalize_phone(phone, &self.country_code);
        self.sessions
            .iter()
            .find(|session| {
                session.phone.as_deref() == Some(phone.as_str()) && !session.link.is_closed()
            })
            .map(|session| session.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<TestClient> {
        self.sessions.remove(id).map(|(_, client)| client)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
