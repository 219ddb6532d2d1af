//! Canonical nginx fragments for one routed service

/// One routed service: an upstream block plus a location block keyed by `name`
///
/// The name doubles as the container's DNS name on the shared network, so the
/// upstream points at `name:port` rather than an IP that changes on restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    pub name: String,
    pub network: String,
    pub port: u16,
}

impl RoutingEntry {
    pub fn new(name: impl Into<String>, network: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            network: network.into(),
            port,
        }
    }

    /// Upstream block with a single server pointing at `name:port`
    pub fn upstream_fragment(&self) -> String {
        format!(
            "upstream {name} {{\n    server {name}:{port};\n}}",
            name = self.name,
            port = self.port
        )
    }

    /// Location block at `/name` proxying to the upstream
    pub fn location_fragment(&self) -> String {
        format!(
            "location /{name} {{\n\
             \x20   proxy_pass http://{name}/;\n\
             \x20   proxy_set_header Host $host;\n\
             \x20   proxy_set_header X-Real-IP $remote_addr;\n\
             \x20   proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
             \x20   proxy_set_header X-Forwarded-Proto $scheme;\n\
             \x20   proxy_redirect off;\n\
             }}",
            name = self.name
        )
    }
}
