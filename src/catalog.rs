//! Static metadata for every application pvarr can deploy.

use serde::Serialize;

/// Image, default web port and description of one application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub image: &'static str,
    pub port: Option<u16>,
}

const fn spec(name: &'static str, description: &'static str, image: &'static str, port: Option<u16>) -> ServiceSpec {
    ServiceSpec {
        name,
        description,
        image,
        port,
    }
}

pub const GLUETUN: ServiceSpec = spec("gluetun", "VPN Client", "qmcgaw/gluetun:latest", None);
pub const TAILSCALE: ServiceSpec = spec("tailscale", "Secure Network", "tailscale/tailscale:latest", None);

pub const SERVICES: &[ServiceSpec] = &[
    // Arr apps
    spec("sonarr", "TV Series Management", "linuxserver/sonarr:latest", Some(8989)),
    spec("radarr", "Movie Management", "linuxserver/radarr:latest", Some(7878)),
    spec("lidarr", "Music Management", "linuxserver/lidarr:latest", Some(8686)),
    spec("readarr", "Book & Audiobook Management", "linuxserver/readarr:latest", Some(8787)),
    spec("prowlarr", "Indexer Management", "linuxserver/prowlarr:latest", Some(9696)),
    spec("bazarr", "Subtitle Management", "linuxserver/bazarr:latest", Some(6767)),
    // Download clients
    spec("transmission", "Torrent Client", "linuxserver/transmission:latest", Some(9091)),
    spec("qbittorrent", "Torrent Client", "linuxserver/qbittorrent:latest", Some(8080)),
    spec("nzbget", "Usenet Client", "linuxserver/nzbget:latest", Some(6789)),
    spec("sabnzbd", "Usenet Client", "linuxserver/sabnzbd:latest", Some(8080)),
    spec("jdownloader", "Direct Download Client", "jlesage/jdownloader-2:latest", Some(5800)),
    // Media servers
    spec("jellyfin", "Media Server", "linuxserver/jellyfin:latest", Some(8096)),
    spec("plex", "Media Server", "linuxserver/plex:latest", Some(32400)),
    spec("emby", "Media Server", "linuxserver/emby:latest", Some(8096)),
    // Utilities
    spec("get_iplayer", "BBC Content Downloader", "lsiobase/alpine:3.13", Some(1935)),
    spec("heimdall", "Application Dashboard", "linuxserver/heimdall:latest", Some(80)),
    spec("overseerr", "Media Requests", "linuxserver/overseerr:latest", Some(5055)),
    spec("tautulli", "Plex Monitoring", "linuxserver/tautulli:latest", Some(8181)),
    spec("portainer", "Docker Management", "portainer/portainer-ce:latest", Some(9000)),
    spec("nginx_proxy_manager", "Reverse Proxy", "jc21/nginx-proxy-manager:latest", Some(81)),
    GLUETUN,
    TAILSCALE,
];

pub fn lookup(name: &str) -> Option<&'static ServiceSpec> {
    SERVICES.iter().find(|s| s.name == name)
}

/// Web UI URL on `host` for a service with a known port
pub fn web_url(name: &str, host: &str) -> Option<String> {
    let port = lookup(name)?.port?;
    Some(format!("http://{}:{}", host, port))
}
