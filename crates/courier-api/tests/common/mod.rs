#![allow(dead_code)]

use std::sync::Arc;

use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use courier_api::ingress::{self, Submission};
use courier_api::{AppState, AppStateInner};
use courier_db::Database;
use courier_gateway::Fanout;
use courier_types::api::Claims;
use courier_types::models::{Message, Profile};

pub const SECRET: &str = "test-secret";

pub struct Fixture {
    pub state: AppState,
    pub server_id: Uuid,
    pub general: Uuid,
    pub voice: Uuid,
    pub ada: Profile,
    pub bob: Profile,
    /// Has a profile, but no membership in `server_id`.
    pub outsider: Profile,
}

fn profile(db: &Database, user_id: &str, name: &str) -> Profile {
    let id = Uuid::new_v4();
    db.upsert_profile(&id.to_string(), user_id, name, None).unwrap();
    Profile {
        id,
        user_id: user_id.to_string(),
        name: name.to_string(),
        image_url: None,
    }
}

pub fn fixture() -> Fixture {
    let db = Database::open_in_memory().unwrap();

    let server_id = Uuid::new_v4();
    let general = Uuid::new_v4();
    let voice = Uuid::new_v4();
    db.create_server(&server_id.to_string(), "lab").unwrap();
    db.create_channel(&general.to_string(), &server_id.to_string(), "general", "text")
        .unwrap();
    db.create_channel(&voice.to_string(), &server_id.to_string(), "lounge", "audio")
        .unwrap();

    let ada = profile(&db, "user_ada", "Ada");
    let bob = profile(&db, "user_bob", "Bob");
    let outsider = profile(&db, "user_eve", "Eve");
    for (p, role) in [(&ada, "admin"), (&bob, "guest")] {
        db.add_member(
            &Uuid::new_v4().to_string(),
            &server_id.to_string(),
            &p.id.to_string(),
            role,
        )
        .unwrap();
    }

    let state = Arc::new(AppStateInner {
        db: Arc::new(db),
        fanout: Fanout::new(),
        jwt_secret: SECRET.to_string(),
    });

    Fixture {
        state,
        server_id,
        general,
        voice,
        ada,
        bob,
        outsider,
    }
}

impl Fixture {
    pub fn post(&self, author: &Profile, content: &str) -> Message {
        ingress::submit(
            &self.state.db,
            &self.state.fanout,
            author,
            Submission {
                server_id: Some(self.server_id),
                channel_id: self.general,
                content: content.to_string(),
                file_url: None,
            },
        )
        .unwrap()
    }

    /// Make every later message insert fail inside the store.
    pub fn fail_message_writes(&self) {
        self.state
            .db
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER fail_message_writes BEFORE INSERT ON messages
                     BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
                )?;
                Ok(())
            })
            .unwrap();
    }
}

pub fn token(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}
