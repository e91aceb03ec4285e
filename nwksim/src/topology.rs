//! Radio links between simulated nodes.

use hashbrown::HashMap;
use nwkstack::{Duration, ShortAddr};

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Link quality reported with every frame crossing the link.
    pub lqi: u8,
    /// Frame loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation delay.
    pub delay: Duration,
    /// Whether the link is currently up.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            lqi: 200,
            loss_rate: 0.0,
            delay: Duration::from_millis(2),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lqi(mut self, lqi: u8) -> Self {
        self.lqi = lqi;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Which node can hear which. Links are symmetric.
#[derive(Debug, Clone)]
pub struct Topology {
    links: HashMap<(ShortAddr, ShortAddr), Link>,
    default_link: Link,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
            default_link: Link::default(),
        }
    }

    /// Link properties used by [`connect`](Self::connect).
    pub fn with_default_link(mut self, link: Link) -> Self {
        self.default_link = link;
        self
    }

    /// Every node hears every other node.
    pub fn fully_connected(nodes: &[ShortAddr]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Each node hears only its predecessor and successor.
    pub fn chain(nodes: &[ShortAddr]) -> Self {
        let mut topo = Self::new();
        for window in nodes.windows(2) {
            topo.add_link(window[0], window[1], Link::default());
        }
        topo
    }

    /// First node is the hub, heard by all others.
    pub fn star(nodes: &[ShortAddr]) -> Self {
        let mut topo = Self::new();
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    /// Add a link with the default properties.
    pub fn connect(&mut self, a: ShortAddr, b: ShortAddr) {
        let link = self.default_link.clone();
        self.add_link(a, b, link);
    }

    /// Add or replace the link between two nodes.
    pub fn add_link(&mut self, a: ShortAddr, b: ShortAddr, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    pub fn remove_link(&mut self, a: ShortAddr, b: ShortAddr) -> Option<Link> {
        self.links.remove(&Self::canonical_pair(a, b))
    }

    pub fn get_link(&self, a: ShortAddr, b: ShortAddr) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: ShortAddr, b: ShortAddr) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Link exists and is up.
    pub fn is_connected(&self, a: ShortAddr, b: ShortAddr) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes `node` can currently hear, in address order.
    pub fn neighbors(&self, node: ShortAddr) -> Vec<ShortAddr> {
        let mut result: Vec<ShortAddr> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| match node {
                n if n == a => Some(b),
                n if n == b => Some(a),
                _ => None,
            })
            .collect();
        result.sort_unstable();
        result
    }

    /// Take down every link crossing between groups.
    pub fn partition(&mut self, groups: &[Vec<ShortAddr>]) {
        let group_of = |addr: ShortAddr| groups.iter().position(|g| g.contains(&addr));
        for (&(a, b), link) in self.links.iter_mut() {
            if group_of(a) != group_of(b) {
                link.active = false;
            }
        }
    }

    /// Bring every link back up.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
        self.default_link.loss_rate = rate;
    }

    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
        self.default_link.delay = delay;
    }

    pub fn default_link(&self) -> &Link {
        &self.default_link
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn canonical_pair(a: ShortAddr, b: ShortAddr) -> (ShortAddr, ShortAddr) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fully_connected() {
        let topo = Topology::fully_connected(&[0, 1, 52, 205]);
        assert_eq!(topo.link_count(), 6);
        assert!(topo.is_connected(0, 205));
        assert!(topo.is_connected(205, 52));
    }

    #[test]
    fn test_chain() {
        let topo = Topology::chain(&[0, 1, 2, 3]);
        assert!(topo.is_connected(0, 1));
        assert!(topo.is_connected(2, 1));
        assert!(!topo.is_connected(0, 2));
        assert_eq!(topo.neighbors(1), vec![0, 2]);
    }

    #[test]
    fn test_star() {
        let topo = Topology::star(&[0, 1, 52, 103]);
        assert_eq!(topo.neighbors(0), vec![1, 52, 103]);
        assert_eq!(topo.neighbors(52), vec![0]);
        assert!(!topo.is_connected(1, 52));
        assert_eq!(Topology::star(&[]).link_count(), 0);
    }

    #[test]
    fn test_partition_and_heal() {
        let mut topo = Topology::fully_connected(&[0, 1, 52, 53]);
        topo.partition(&[vec![0, 1], vec![52, 53]]);
        assert!(topo.is_connected(0, 1));
        assert!(topo.is_connected(52, 53));
        assert!(!topo.is_connected(1, 52));
        assert_eq!(topo.neighbors(0), vec![1]);

        topo.heal();
        assert!(topo.is_connected(1, 52));
    }

    #[test]
    fn test_disabled_link_is_not_a_neighbor() {
        let mut topo = Topology::chain(&[0, 1]);
        topo.get_link_mut(1, 0).unwrap().active = false;
        assert!(topo.neighbors(0).is_empty());
        assert!(topo.get_link(0, 1).is_some());
    }

    #[test]
    fn test_connect_uses_default_link() {
        let mut topo = Topology::new().with_default_link(Link::new().with_lqi(90));
        topo.connect(1, 64);
        assert_eq!(topo.get_link(64, 1).unwrap().lqi, 90);
        topo.set_global_loss_rate(2.0);
        assert_eq!(topo.get_link(1, 64).unwrap().loss_rate, 1.0);
    }
}
