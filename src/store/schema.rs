pub const SCHEMA: &str = r#"
-- Subjects: one row per person, profile sealed with the subject's own key
CREATE TABLE IF NOT EXISTS users (
    token TEXT,
    "key" TEXT,                -- subject key, wrapped by the master key
    md5 TEXT,                  -- digest of the plaintext profile
    loginidx TEXT,
    emailidx TEXT,
    phoneidx TEXT,
    rofields TEXT,
    tempcodeexp INTEGER,
    tempcode INTEGER,
    data TEXT
);

-- Cross-reference tokens handed to third parties
CREATE TABLE IF NOT EXISTS xtokens (
    xtoken TEXT,
    token TEXT,
    type TEXT,
    app TEXT,
    fields TEXT,
    endtime INTEGER
);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS audit (
    atoken TEXT,
    identity TEXT,
    record TEXT,
    who TEXT,
    mode TEXT,
    app TEXT,
    title TEXT,
    status TEXT,
    msg TEXT,
    debug TEXT,
    "before" TEXT,
    "after" TEXT,
    "when" INTEGER
);

-- Ephemeral per-subject sessions; data is sealed, endtime 0 = never
CREATE TABLE IF NOT EXISTS sessions (
    token TEXT,
    session TEXT,
    data TEXT,
    endtime INTEGER,
    "when" INTEGER
);

-- Subject requests awaiting approval
CREATE TABLE IF NOT EXISTS requests (
    rtoken TEXT,
    token TEXT,
    app TEXT,
    brief TEXT,
    "action" TEXT,
    status TEXT,
    change TEXT,
    reason TEXT,
    creationtime INTEGER,
    "when" INTEGER
);

-- Records shared with partners for a limited time
CREATE TABLE IF NOT EXISTS sharedrecords (
    token TEXT,
    record TEXT,
    partner TEXT,
    session TEXT,
    app TEXT,
    fields TEXT,
    endtime INTEGER,
    "when" INTEGER
);

-- Processing activity registry
CREATE TABLE IF NOT EXISTS processingactivities (
    activity TEXT,
    title TEXT,
    script TEXT,
    fulldesc TEXT,
    legalbasis TEXT,
    applicableto TEXT,
    creationtime INTEGER
);

-- Legal basis definitions
CREATE TABLE IF NOT EXISTS legalbasis (
    brief TEXT,
    status TEXT,
    module TEXT,
    shortdesc TEXT,
    fulldesc TEXT,
    basistype TEXT,
    requiredmsg TEXT,
    usercontrol BOOLEAN,
    requiredflag BOOLEAN,
    creationtime INTEGER
);

-- Consent agreements per subject and legal basis
CREATE TABLE IF NOT EXISTS agreements (
    who TEXT,
    mode TEXT,
    token TEXT,
    brief TEXT,
    status TEXT,
    referencecode TEXT,
    lastmodifiedby TEXT,
    agreementmethod TEXT,
    creationtime INTEGER,
    starttime INTEGER,
    endtime INTEGER,
    "when" INTEGER
);

-- Create indexes
CREATE INDEX IF NOT EXISTS users_token ON users(token);
-- Lookup indexes are unique; forgotten subjects keep NULLs, which never collide
DROP INDEX IF EXISTS users_login;
DROP INDEX IF EXISTS users_email;
DROP INDEX IF EXISTS users_phone;
CREATE UNIQUE INDEX IF NOT EXISTS users_loginidx ON users(loginidx);
CREATE UNIQUE INDEX IF NOT EXISTS users_emailidx ON users(emailidx);
CREATE UNIQUE INDEX IF NOT EXISTS users_phoneidx ON users(phoneidx);
CREATE UNIQUE INDEX IF NOT EXISTS xtokens_xtoken ON xtokens(xtoken);
CREATE INDEX IF NOT EXISTS xtokens_uniq ON xtokens(token, type);
CREATE INDEX IF NOT EXISTS audit_atoken ON audit(atoken);
CREATE INDEX IF NOT EXISTS audit_record ON audit(record);
CREATE INDEX IF NOT EXISTS sessions_token ON sessions(token);
CREATE INDEX IF NOT EXISTS sessions_session ON sessions(session);
CREATE INDEX IF NOT EXISTS requests_rtoken ON requests(rtoken);
CREATE INDEX IF NOT EXISTS requests_token ON requests(token);
CREATE INDEX IF NOT EXISTS requests_status ON requests(status);
CREATE INDEX IF NOT EXISTS sharedrecords_record ON sharedrecords(record);
CREATE INDEX IF NOT EXISTS processingactivities_activity ON processingactivities(activity);
CREATE INDEX IF NOT EXISTS legalbasis_brief ON legalbasis(brief);
CREATE INDEX IF NOT EXISTS agreements_token ON agreements(token);
CREATE INDEX IF NOT EXISTS agreements_brief ON agreements(brief);
"#;

/// DDL for a per-application table. `name` must already be validated.
pub fn app_table_schema(name: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {name} (
    token TEXT,
    md5 TEXT,
    rofields TEXT,
    data TEXT,
    status TEXT,
    "when" INTEGER
);
CREATE INDEX IF NOT EXISTS {name}_token ON {name}(token);
"#
    )
}
