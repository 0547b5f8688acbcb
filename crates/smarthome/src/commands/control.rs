//! Device and group control handlers.

use smarthome_core::color::kelvin_to_rgb;
use smarthome_core::{ALL_GROUP, Rgb, Target};

use crate::cli::{ColorArgs, GlobalOpts, LevelArgs, Power, SceneArgs, SwitchArgs, TargetArgs, TemperatureArgs};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

use super::util;

fn target(session: &Session, identifier: &str) -> Result<Target, CliError> {
    util::resolve_target(&session.bridge.tree(), identifier)
}

fn done(global: &GlobalOpts, message: &str) {
    output::print_output(message, global.quiet);
}

pub async fn switch(session: &Session, args: &SwitchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let target = target(session, &args.target)?;
    let on = args.power == Power::On;
    session.bridge.switch(&target, on).await?;
    done(global, &format!("{} switched {}", args.target, if on { "on" } else { "off" }));
    Ok(())
}

pub async fn brightness(session: &Session, args: &LevelArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let target = target(session, &args.target)?;
    session
        .bridge
        .brightness(&target, util::fraction(args.percent))
        .await?;
    done(global, &format!("{} brightness set to {}%", args.target, args.percent));
    Ok(())
}

pub async fn color(session: &Session, args: &ColorArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let rgb = Rgb::parse(&args.color)
        .ok_or_else(|| CliError::validation("color", format!("{:?} is not #rrggbb or r,g,b", args.color)))?;
    let target = target(session, &args.target)?;
    session.bridge.color(&target, rgb).await?;
    done(global, &format!("{} color set to {rgb}", args.target));
    Ok(())
}

pub async fn temperature(
    session: &Session,
    args: &TemperatureArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let target = target(session, &args.target)?;
    session
        .bridge
        .color_temperature(&target, kelvin_to_rgb(args.kelvin))
        .await?;
    done(global, &format!("{} temperature set to {}K", args.target, args.kelvin));
    Ok(())
}

pub async fn position(session: &Session, args: &LevelArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let target = target(session, &args.target)?;
    session
        .bridge
        .position(&target, util::fraction(args.percent))
        .await?;
    done(global, &format!("{} moving to {}%", args.target, args.percent));
    Ok(())
}

pub async fn up(session: &Session, args: &TargetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let target = target(session, &args.target)?;
    session.bridge.up(&target).await?;
    done(global, &format!("{} opening", args.target));
    Ok(())
}

pub async fn down(session: &Session, args: &TargetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let target = target(session, &args.target)?;
    session.bridge.down(&target).await?;
    done(global, &format!("{} closing", args.target));
    Ok(())
}

pub async fn scene(session: &Session, args: &SceneArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let tree = session.bridge.tree();
    let scene = util::resolve_scene(&tree, &args.scene)?;
    let targets = if args.targets.is_empty() {
        vec![ALL_GROUP.to_owned()]
    } else {
        args.targets
            .iter()
            .map(|t| util::resolve_target(&tree, t).map(|target| target.id().to_owned()))
            .collect::<Result<Vec<_>, _>>()?
    };
    session.bridge.scene(&scene, &targets).await?;
    done(global, &format!("{} activated", args.scene));
    Ok(())
}
