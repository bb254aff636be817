#[derive(Debug)]
pub enum TqErrorKind {
    Config(ConfigError),
    Build(BuildError),
    Spawn(SpawnError),
    HealthTimeout,
    PortExhausted,
    UpstreamDial(ProxyError),
    UpstreamIo(ProxyError),
    FastCgiProtocol(FastCgiError),
    Registry(RegistryError),
    Cancelled,
}

#[derive(Debug)]
pub enum ConfigError {
    Malformed,
    InvalidInvariant,
    Io,
}

#[derive(Debug)]
pub enum BuildError {
    DriverFailed,
    ArtifactMissing,
}

#[derive(Debug)]
pub enum SpawnError {
    BinaryMissing,
    PermissionDenied,
    Io,
}

#[derive(Debug)]
pub enum ProxyError {
    ConnectionFailed,
    InvalidRequest,
    InvalidResponse,
    UpstreamUnavailable,
    Timeout,
}

#[derive(Debug)]
pub enum FastCgiError {
    Initialization,
    Connection,
    Communication,
    Timeout,
    Framing,
    Aborted,
    Internal,
}

#[derive(Debug)]
pub enum RegistryError {
    NoRouteMatched,
    UnknownWorker,
}
