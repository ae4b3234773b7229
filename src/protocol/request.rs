//! Client packets.
use std::io::Write;

use super::{
    CLIENT_REVISION, CLIENT_VERSION_MAJOR, CLIENT_VERSION_MINOR, CLIENT_VERSION_PATCH,
    DBMS_MIN_PROTOCOL_VERSION_WITH_ADDENDUM, DBMS_MIN_PROTOCOL_VERSION_WITH_DISTRIBUTED_DEPTH,
    DBMS_MIN_PROTOCOL_VERSION_WITH_INITIAL_QUERY_START_TIME,
    DBMS_MIN_PROTOCOL_VERSION_WITH_PARAMETERS, DBMS_MIN_REVISION_WITH_INTERSERVER_SECRET,
    DBMS_MIN_REVISION_WITH_OPENTELEMETRY, DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS,
    DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO, DBMS_MIN_REVISION_WITH_VERSION_PATCH,
    INTERFACE_TCP, QUERY_KIND_INITIAL, STAGE_COMPLETE, client,
};
use crate::{
    binary::Encoder,
    config::{Auth, Options},
    error::Result,
    settings::Settings,
};

/// Who is asking, as reported in the hello and in every query.
#[derive(Debug, Clone, Copy)]
pub struct ClientInfo<'a> {
    pub name: &'a str,
    pub hostname: &'a str,
    pub os_user: &'a str,
}

impl<'a> From<&'a Options> for ClientInfo<'a> {
    fn from(options: &'a Options) -> Self {
        Self {
            name: &options.client_name,
            hostname: &options.client_hostname,
            os_user: &options.os_user,
        }
    }
}

impl ClientInfo<'_> {
    fn encode(&self, w: &mut dyn Write, revision: u64) -> Result<()> {
        w.write_u8(QUERY_KIND_INITIAL)?;
        w.write_string("")?; // initial user
        w.write_string("")?; // initial query id
        w.write_string("0.0.0.0:0")?; // initial address
        if revision >= DBMS_MIN_PROTOCOL_VERSION_WITH_INITIAL_QUERY_START_TIME {
            w.write_i64(0)?;
        }
        w.write_u8(INTERFACE_TCP)?;
        w.write_string(self.os_user)?;
        w.write_string(self.hostname)?;
        w.write_string(self.name)?;
        w.write_uvarint(CLIENT_VERSION_MAJOR)?;
        w.write_uvarint(CLIENT_VERSION_MINOR)?;
        w.write_uvarint(CLIENT_REVISION)?;
        if revision >= DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO {
            w.write_string("")?;
        }
        if revision >= DBMS_MIN_PROTOCOL_VERSION_WITH_DISTRIBUTED_DEPTH {
            w.write_uvarint(0)?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_VERSION_PATCH {
            w.write_uvarint(CLIENT_VERSION_PATCH)?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_OPENTELEMETRY {
            // no trace context
            w.write_u8(0)?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS {
            w.write_uvarint(0)?; // collaborate with initiator
            w.write_uvarint(0)?; // count participating replicas
            w.write_uvarint(0)?; // number of current replica
        }
        Ok(())
    }
}

/// The body of a query packet.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    pub id: &'a str,
    pub body: &'a str,
    /// Already merged connection and query settings.
    pub settings: &'a Settings,
    pub compression: bool,
    pub client: ClientInfo<'a>,
}

#[derive(Debug, Clone)]
pub enum Request<'a> {
    Hello {
        client: ClientInfo<'a>,
        auth: &'a Auth,
    },
    /// Sent right after a successful hello on new enough revisions.
    Addendum,
    Query(Query<'a>),
    Ping,
    Cancel,
}

impl Request<'_> {
    /// Writes the packet at the negotiated `revision`. Nothing is flushed.
    pub fn encode(&self, w: &mut dyn Write, revision: u64) -> Result<()> {
        match self {
            Request::Hello { client, auth } => {
                w.write_u8(client::HELLO)?;
                w.write_string(client.name)?;
                w.write_uvarint(CLIENT_VERSION_MAJOR)?;
                w.write_uvarint(CLIENT_VERSION_MINOR)?;
                w.write_uvarint(CLIENT_REVISION)?;
                w.write_string(&auth.database)?;
                w.write_string(&auth.username)?;
                w.write_string(&auth.password)?;
            }
            Request::Addendum => {
                if revision >= DBMS_MIN_PROTOCOL_VERSION_WITH_ADDENDUM {
                    // quota key
                    w.write_string("")?;
                }
            }
            Request::Query(query) => {
                w.write_u8(client::QUERY)?;
                w.write_string(query.id)?;
                query.client.encode(w, revision)?;
                query.settings.encode(w, revision)?;
                w.write_string("")?;
                if revision >= DBMS_MIN_REVISION_WITH_INTERSERVER_SECRET {
                    w.write_string("")?;
                }
                w.write_uvarint(STAGE_COMPLETE)?;
                w.write_bool(query.compression)?;
                w.write_string(query.body)?;
                if revision >= DBMS_MIN_PROTOCOL_VERSION_WITH_PARAMETERS {
                    // parameters are bound client side
                    w.write_string("")?;
                }
            }
            Request::Ping => w.write_u8(client::PING)?,
            Request::Cancel => w.write_u8(client::CANCEL)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::binary::Decoder;

    fn client() -> ClientInfo<'static> {
        ClientInfo {
            name: "tundra-test",
            hostname: "box",
            os_user: "ops",
        }
    }

    #[test]
    fn hello_carries_credentials() {
        let auth = Auth {
            database: "metrics".into(),
            username: "reader".into(),
            password: "secret".into(),
        };
        let mut out = Vec::new();
        Request::Hello {
            client: client(),
            auth: &auth,
        }
        .encode(&mut out, 0)
        .unwrap();

        let mut input = Cursor::new(out);
        assert_eq!(input.read_u8().unwrap(), client::HELLO);
        assert_eq!(input.read_string().unwrap(), "tundra-test");
        assert_eq!(input.read_uvarint().unwrap(), CLIENT_VERSION_MAJOR);
        assert_eq!(input.read_uvarint().unwrap(), CLIENT_VERSION_MINOR);
        assert_eq!(input.read_uvarint().unwrap(), CLIENT_REVISION);
        assert_eq!(input.read_string().unwrap(), "metrics");
        assert_eq!(input.read_string().unwrap(), "reader");
        assert_eq!(input.read_string().unwrap(), "secret");
    }

    #[test]
    fn addendum_only_for_new_revisions() {
        let mut out = Vec::new();
        Request::Addendum.encode(&mut out, 54457).unwrap();
        assert!(out.is_empty());
        Request::Addendum.encode(&mut out, 54458).unwrap();
        assert_eq!(out, [0]);
    }

    fn encode_query(revision: u64, settings: &Settings) -> Cursor<Vec<u8>> {
        let mut out = Vec::new();
        Request::Query(Query {
            id: "q-1",
            body: "SELECT 1",
            settings,
            compression: true,
            client: client(),
        })
        .encode(&mut out, revision)
        .unwrap();
        Cursor::new(out)
    }

    fn skip_client_info(input: &mut Cursor<Vec<u8>>, revision: u64) {
        assert_eq!(input.read_u8().unwrap(), QUERY_KIND_INITIAL);
        for _ in 0..3 {
            input.read_string().unwrap();
        }
        if revision >= DBMS_MIN_PROTOCOL_VERSION_WITH_INITIAL_QUERY_START_TIME {
            input.read_i64().unwrap();
        }
        assert_eq!(input.read_u8().unwrap(), INTERFACE_TCP);
        assert_eq!(input.read_string().unwrap(), "ops");
        assert_eq!(input.read_string().unwrap(), "box");
        assert_eq!(input.read_string().unwrap(), "tundra-test");
        for _ in 0..3 {
            input.read_uvarint().unwrap();
        }
        input.read_string().unwrap(); // quota key
        if revision >= DBMS_MIN_PROTOCOL_VERSION_WITH_DISTRIBUTED_DEPTH {
            input.read_uvarint().unwrap();
        }
        input.read_uvarint().unwrap(); // patch
        if revision >= DBMS_MIN_REVISION_WITH_OPENTELEMETRY {
            assert_eq!(input.read_u8().unwrap(), 0);
        }
        if revision >= DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS {
            for _ in 0..3 {
                input.read_uvarint().unwrap();
            }
        }
    }

    #[test]
    fn query_layout_at_current_revision() {
        let settings = Settings::new().with("max_threads", 2_i64);
        let mut input = encode_query(CLIENT_REVISION, &settings);

        assert_eq!(input.read_u8().unwrap(), client::QUERY);
        assert_eq!(input.read_string().unwrap(), "q-1");
        skip_client_info(&mut input, CLIENT_REVISION);
        assert_eq!(input.read_string().unwrap(), "max_threads");
        assert!(!input.read_bool().unwrap());
        assert_eq!(input.read_string().unwrap(), "2");
        assert_eq!(input.read_string().unwrap(), ""); // end of settings
        assert_eq!(input.read_string().unwrap(), ""); // inter-server secret
        assert_eq!(input.read_uvarint().unwrap(), STAGE_COMPLETE);
        assert!(input.read_bool().unwrap());
        assert_eq!(input.read_string().unwrap(), "SELECT 1");
        assert_eq!(input.read_string().unwrap(), ""); // parameters
        assert_eq!(input.position() as usize, input.get_ref().len());
    }

    #[test]
    fn query_layout_at_old_revision() {
        let revision = 54420;
        let mut input = encode_query(revision, &Settings::new());

        assert_eq!(input.read_u8().unwrap(), client::QUERY);
        assert_eq!(input.read_string().unwrap(), "q-1");
        skip_client_info(&mut input, revision);
        assert_eq!(input.read_string().unwrap(), "");
        assert_eq!(input.read_uvarint().unwrap(), STAGE_COMPLETE);
        assert!(input.read_bool().unwrap());
        assert_eq!(input.read_string().unwrap(), "SELECT 1");
        assert_eq!(input.position() as usize, input.get_ref().len());
    }
}
