use anyhow::Context;
use glam::DVec2;
use penumbra::{
    is_position_free, occlusion_polygon, view_cone_occlusion, Agent, MotionConfig, MotionWorld,
    Polygon, Rect,
};

const SCREEN: Rect = Rect {
    x: 0.0,
    y: 0.0,
    w: 500.0,
    h: 500.0,
};
const AGENT_RADIUS: f64 = 10.0;
const IT_SPEED: f64 = 180.0;
const RUNNER_SPEED: f64 = 150.0;
const VIEW_HALF_ANGLE: f64 = std::f64::consts::FRAC_PI_3;
const TAG_COOLDOWN_TICKS: u32 = 60;
const REPORT_EVERY_TICKS: u32 = 60;

/// Heading in radians, left-handed screen frame.
struct Facing(f64);

/// Marks the agent who is "it".
struct It;

struct Name(&'static str);

struct TagApp {
    motion: MotionWorld,
    world: hecs::World,
    tag_cooldown: u32,
    tick: u32,
}

impl TagApp {
    fn new(config: MotionConfig) -> anyhow::Result<Self> {
        let mut motion = MotionWorld::new(config, SCREEN);
        for (x, y, w, h) in [
            (100.0, 100.0, 80.0, 30.0),
            (320.0, 80.0, 40.0, 140.0),
            (200.0, 300.0, 120.0, 40.0),
            (60.0, 360.0, 30.0, 90.0),
        ] {
            motion.add_obstacle(
                Polygon::axis_aligned_rect(x, y, w, h).context("failed to build obstacle")?,
            );
        }

        Ok(Self {
            motion,
            world: hecs::World::new(),
            tag_cooldown: 0,
            tick: 0,
        })
    }

    fn init(&mut self) -> anyhow::Result<()> {
        let names = ["alice", "bob", "carol"];
        let spawns = free_positions(self.motion.obstacles(), names.len());
        anyhow::ensure!(spawns.len() == names.len(), "not enough free spawn positions");

        for (i, (name, position)) in names.into_iter().zip(spawns).enumerate() {
            let agent = Agent::new(position, AGENT_RADIUS);
            let entity = self.world.spawn((agent, Facing(0.0), Name(name)));
            if i == 0 {
                self.world.insert_one(entity, It)?;
            }
        }
        Ok(())
    }

    fn update(&mut self, delta_time: f64) -> anyhow::Result<()> {
        self.tag_cooldown = self.tag_cooldown.saturating_sub(1);
        self.command();
        self.motion.step_world(&mut self.world, delta_time);
        self.check_tag()?;

        self.tick += 1;
        if self.tick % REPORT_EVERY_TICKS == 0 {
            self.report()?;
        }
        Ok(())
    }

    /// "It" chases the nearest runner, runners flee from "it".
    fn command(&mut self) {
        let Some(it_position) = self
            .world
            .query_mut::<(&Agent, &It)>()
            .into_iter()
            .map(|(_, (agent, _))| agent.position)
            .next()
        else {
            return;
        };
        let runners: Vec<DVec2> = self
            .world
            .query_mut::<&Agent>()
            .without::<&It>()
            .into_iter()
            .map(|(_, agent)| agent.position)
            .collect();

        let frozen = self.tag_cooldown > 0;
        for (_, (agent, facing, it)) in self
            .world
            .query_mut::<(&mut Agent, &mut Facing, Option<&It>)>()
        {
            let heading = if it.is_some() {
                if frozen {
                    agent.velocity = DVec2::ZERO;
                    continue;
                }
                let target = runners.iter().copied().min_by(|a, b| {
                    a.distance_squared(agent.position)
                        .total_cmp(&b.distance_squared(agent.position))
                });
                match target {
                    Some(t) => (t - agent.position).normalize_or_zero() * IT_SPEED,
                    None => DVec2::ZERO,
                }
            } else {
                (agent.position - it_position).normalize_or_zero() * RUNNER_SPEED
            };

            agent.velocity = heading;
            if heading != DVec2::ZERO {
                facing.0 = (-heading.y).atan2(heading.x);
            }
        }
    }

    fn check_tag(&mut self) -> anyhow::Result<()> {
        if self.tag_cooldown > 0 {
            return Ok(());
        }
        let Some((it_entity, it_agent)) = self
            .world
            .query_mut::<(&Agent, &It)>()
            .into_iter()
            .map(|(e, (agent, _))| (e, *agent))
            .next()
        else {
            return Ok(());
        };

        let tagged = self
            .world
            .query_mut::<&Agent>()
            .without::<&It>()
            .into_iter()
            .find(|(_, agent)| {
                agent.position.distance(it_agent.position) < agent.radius + it_agent.radius
            })
            .map(|(e, _)| e);

        if let Some(entity) = tagged {
            self.world.remove_one::<It>(it_entity)?;
            self.world.insert_one(entity, It)?;
            self.tag_cooldown = TAG_COOLDOWN_TICKS;
            let name = self.world.get::<&Name>(entity)?.0;
            log::info!("tick {}: {name} is it", self.tick);
        }
        Ok(())
    }

    /// Log how much of the screen each runner cannot see.
    fn report(&mut self) -> anyhow::Result<()> {
        let screen_area = SCREEN.w * SCREEN.h;
        for (_, (agent, facing, name)) in self
            .world
            .query::<(&Agent, &Facing, &Name)>()
            .without::<&It>()
            .iter()
        {
            let mut hidden = 0.0;
            for obstacle in self.motion.obstacles() {
                let shadow = occlusion_polygon(obstacle, agent.position, &SCREEN)
                    .with_context(|| format!("{} has no line of sight", name.0))?;
                hidden += polygon_area(&shadow);
            }
            let cone = view_cone_occlusion(agent.position, facing.0, VIEW_HALF_ANGLE, false, &SCREEN)?;

            log::info!(
                "tick {}: {} at ({:.1}, {:.1}) shadows {:.0}% view cone hides {:.0}%",
                self.tick,
                name.0,
                agent.position.x,
                agent.position.y,
                100.0 * hidden / screen_area,
                100.0 * polygon_area(&cone) / screen_area,
            );
        }
        Ok(())
    }
}

/// Deterministic spawn points on a coarse grid, clear of every obstacle.
fn free_positions(obstacles: &[Polygon], count: usize) -> Vec<DVec2> {
    let step = 4.0 * AGENT_RADIUS;
    let cells = (SCREEN.w / step) as usize;
    (0..cells * cells)
        .map(|i| {
            // walk the grid diagonally so spawns spread out
            let (col, row) = ((i * 7) % cells, (i * 3 + i / cells) % cells);
            DVec2::new(
                SCREEN.x + (col as f64 + 0.5) * step,
                SCREEN.y + (row as f64 + 0.5) * step,
            )
        })
        .filter(|p| is_position_free(*p, 2.0 * AGENT_RADIUS, obstacles))
        .take(count)
        .collect()
}

/// Shoelace area of a simple polygon.
fn polygon_area(vertices: &[DVec2]) -> f64 {
    let n = vertices.len();
    let twice: f64 = (0..n)
        .map(|i| vertices[i].perp_dot(vertices[(i + 1) % n]))
        .sum();
    0.5 * twice.abs()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let ticks: u32 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("tick count must be a number")?,
        None => 600,
    };
    let config = MotionConfig {
        use_continuous_collision: true,
        ..Default::default()
    };
    let dt = config.fixed_timestep;

    let mut app = TagApp::new(config)?;
    app.init()?;
    for _ in 0..ticks {
        app.update(dt)?;
    }
    Ok(())
}
