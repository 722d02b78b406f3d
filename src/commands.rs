//! Command-line subcommands.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Create an account and its profile
  SignUp {
    #[arg(long)]
    name: String,
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    /// Falls back to SNAPGRAM_PASSWORD
    #[arg(long)]
    password: Option<String>,
  },

  /// Start a session
  #[command(visible_alias = "login")]
  SignIn {
    #[arg(long)]
    email: String,
    /// Falls back to SNAPGRAM_PASSWORD
    #[arg(long)]
    password: Option<String>,
  },

  /// End the current session
  #[command(visible_alias = "logout")]
  SignOut,

  /// Show the signed-in user
  Whoami,

  /// Browse the explore feed, newest update first
  #[command(visible_alias = "explore")]
  Feed {
    /// Number of pages to load
    #[arg(short, long, default_value_t = 1)]
    pages: u32,
  },

  /// Latest posts
  #[command(visible_alias = "home")]
  Recent,

  /// Show, create, update or delete a post
  #[command(subcommand)]
  Post(PostCommand),

  /// Toggle your like on a post
  Like { post_id: String },

  /// Toggle saving a post
  Save { post_id: String },

  /// Search post captions
  #[command(visible_alias = "s")]
  Search { term: String },

  /// List users, newest first
  Users {
    #[arg(short, long)]
    limit: Option<u32>,
  },

  /// Show a user's profile and posts
  User { user_id: String },

  /// Edit your profile
  #[command(subcommand)]
  Profile(ProfileCommand),
}

#[derive(Subcommand, Debug)]
pub enum PostCommand {
  Show {
    post_id: String,
  },
  Create {
    /// Image file to upload
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = "")]
    caption: String,
    #[arg(long, default_value = "")]
    location: String,
    /// Comma separated, e.g. "art, travel"
    #[arg(long, default_value = "")]
    tags: String,
  },
  /// Change a post; unset fields keep their current value
  Update {
    post_id: String,
    #[arg(long)]
    caption: Option<String>,
    /// Replacement image
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    tags: Option<String>,
  },
  Delete {
    post_id: String,
  },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
  /// Change your profile; unset fields keep their current value
  Update {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    bio: Option<String>,
    /// New avatar image
    #[arg(long)]
    image: Option<PathBuf>,
  },
}
