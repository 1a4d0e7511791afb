// crates/mctech-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic example for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example `mctech.toml`. Every section is present with its default
//! or a representative value.

/// Returns a canonical example `mctech.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[tenant]
enabled = true
forbidden-prepare = false

[db-checker]
enabled = true
api-prefix = "http://node-infra-dim-service.mc/"
mutex = ["global_*", "asset_*"]
exclude = ["global_platform", "starts-with:global_dw_"]
across = ["global_cq3|global_qa"]
excepts = ["org-service", "pf-svc.sales", "@mctech/dp-impala"]

[ddl.version]
enabled = true
name = "__version"
db-matches = ["global_*"]

[mpp]
default-value = "allow"

[sql-checker]
enabled = true

[metrics.query-log]
enabled = false
max-length = 4096

[metrics.large-query]
enabled = true
filename = "mctech_large_query_log.log"
threshold = 4194304
types = ["delete", "insert", "update", "select"]

[metrics.sql-trace]
enabled = true
filename = "mctech_tidb_full_sql.log"
compress-threshold = 4096
full-sql-dir = "/data/full-sql"
group = "cluster-a"

[metrics.sql-trace.ignore]
by-databases = ["test"]
by-roles = ["mc_read"]

[sequence]
api-prefix = "http://node-infra-sequence-service.mc/"
backend = 5
mock = false
debug = false
max-fetch-count = 1000

[encryption]
api-prefix = "http://node-infra-encryption-service.mc/"
access-id = "oJEKJh1wvqncJYASxp1Iiw"
mock = false
"#,
    )
}
